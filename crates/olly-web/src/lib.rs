//! HTTP API for the correlation engine
//!
//! Exposes context lookup, timelines, raw records and root-cause analysis
//! over REST, plus health and self-metrics endpoints.

mod api;

pub use api::{ApiError, RcaRequest};

use axum::{
    response::Json,
    routing::{get, post},
    Router,
};
use olly_core::config::WebSettings;
use olly_core::metrics::SharedMetrics;
use olly_correlate::QueryEngine;
use olly_enrich::CardinalityGuard;
use olly_rca::RcaService;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Web server configuration
#[derive(Debug, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl From<&WebSettings> for WebConfig {
    fn from(settings: &WebSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
        }
    }
}

/// Shared application state
pub struct AppState {
    pub engine: Arc<QueryEngine>,
    pub rca: Arc<RcaService>,
    pub metrics: SharedMetrics,
    /// Ingest-side guard, when this process also runs enrichment
    pub guard: Option<Arc<CardinalityGuard>>,
}

/// Build the API router
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/correlate/{correlation_id}", get(api::get_context))
        .route("/correlate/{correlation_id}/timeline", get(api::get_timeline))
        .route("/correlate/{correlation_id}/traces", get(api::get_traces))
        .route("/correlate/{correlation_id}/logs", get(api::get_logs))
        .route("/rca", post(api::post_rca))
        .route("/api/cardinality", get(api::get_cardinality))
        .route("/api/metrics", get(api::get_metrics))
        .route("/metrics", get(api::get_metrics_prometheus))
        .route("/api/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the web server
pub async fn start_server(config: WebConfig, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Correlation API available at http://{}", addr);
    info!("  - Contexts at /correlate/{{id}}");
    info!("  - Root-cause analysis at POST /rca");
    info!("  - Metrics at /metrics");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check endpoint for Docker/Kubernetes liveness checks
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "ollystack",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
