//! REST API handlers

use crate::AppState;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use olly_correlate::{ContextLookup, CorrelationError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::error;

/// Handler errors, mapped onto HTTP status codes
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("correlation not found")]
    NotFound,

    #[error(transparent)]
    Correlation(#[from] CorrelationError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Correlation(CorrelationError::Validation(_)) => StatusCode::BAD_REQUEST,
            ApiError::Correlation(CorrelationError::UpstreamTimeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            ApiError::Correlation(CorrelationError::Storage(e)) => {
                error!("Storage error: {}", e);
                StatusCode::BAD_GATEWAY
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RcaRequest {
    pub correlation_id: String,
}

pub async fn get_context(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<String>,
) -> Result<Response, ApiError> {
    match state.engine.get_full_context(&correlation_id).await? {
        ContextLookup::Found(ctx) => Ok(Json(ctx.as_ref()).into_response()),
        ContextLookup::NotFound => Err(ApiError::NotFound),
    }
}

pub async fn get_timeline(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = state.engine.accept_id(&correlation_id)?;
    let timeline = state
        .engine
        .get_timeline(id.as_str())
        .await?
        .ok_or(ApiError::NotFound)?;

    Ok(Json(json!({
        "correlation_id": id,
        "count": timeline.len(),
        "timeline": timeline,
    })))
}

pub async fn get_traces(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = state.engine.accept_id(&correlation_id)?;
    let spans = state.engine.get_traces(id.as_str()).await?;
    Ok(Json(json!({
        "correlation_id": id,
        "count": spans.len(),
        "spans": spans,
    })))
}

pub async fn get_logs(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = state.engine.accept_id(&correlation_id)?;
    let logs = state.engine.get_logs(id.as_str()).await?;
    Ok(Json(json!({
        "correlation_id": id,
        "count": logs.len(),
        "logs": logs,
    })))
}

pub async fn post_rca(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RcaRequest>,
) -> Result<Response, ApiError> {
    let ctx = state
        .engine
        .get_full_context(&request.correlation_id)
        .await?
        .found()
        .ok_or(ApiError::NotFound)?;

    let outcome = state.rca.run(&ctx).await;
    Ok(Json(outcome).into_response())
}

pub async fn get_cardinality(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    match &state.guard {
        Some(guard) => Json(json!({
            "enabled": true,
            "total_rejections": guard.total_rejections(),
            "attributes": guard.stats(),
        })),
        None => Json(json!({ "enabled": false })),
    }
}

pub async fn get_metrics(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(state.metrics.to_json())
}

pub async fn get_metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use chrono::{TimeZone, Utc};
    use olly_core::anomaly::AnomalyConfig;
    use olly_core::config::{QuerySettings, RcaSettings};
    use olly_core::metrics::create_metrics;
    use olly_core::telemetry::{LogRecord, Severity, SpanRecord, SpanStatus};
    use olly_correlate::{MemoryStore, QueryEngine};
    use olly_enrich::CardinalityGuard;
    use olly_rca::{RcaService, RootCauseAnalyzer};
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let store = MemoryStore::new("correlation_id");
        let start = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();

        let mut span = SpanRecord::new("checkout", "POST /checkout", start);
        span.span_id = Some("s1".into());
        span.duration_ms = 120.0;
        span.status = SpanStatus::Error;
        span.attributes.insert("correlation_id".into(), "flow-1".into());
        store.insert(span.into());

        let mut log = LogRecord::new("checkout", Severity::Error, "card declined", start);
        log.attributes.insert("correlation_id".into(), "flow-1".into());
        store.insert(log.into());

        let metrics = create_metrics();
        let engine = QueryEngine::new(
            Arc::new(store),
            &QuerySettings::default(),
            AnomalyConfig::default(),
            metrics.clone(),
        );
        let rca = RcaService::new(
            RootCauseAnalyzer::new(RcaSettings::default(), AnomalyConfig::default()),
            metrics.clone(),
        );
        let guard = CardinalityGuard::new(10, chrono::Duration::hours(1));
        guard.allow("http.route", "/checkout");

        Arc::new(AppState {
            engine: Arc::new(engine),
            rca: Arc::new(rca),
            metrics,
            guard: Some(Arc::new(guard)),
        })
    }

    async fn get(uri: &str) -> (StatusCode, serde_json::Value) {
        let response = router(state())
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null))
    }

    #[tokio::test]
    async fn test_get_context() {
        let (status, body) = get("/correlate/flow-1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["correlation_id"], "flow-1");
        assert_eq!(body["summary"]["total_spans"], 1);
        assert_eq!(body["summary"]["error_count"], 2);
    }

    #[tokio::test]
    async fn test_unknown_id_is_404() {
        let (status, body) = get("/correlate/olly-missing").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "correlation not found");
    }

    #[tokio::test]
    async fn test_invalid_id_is_400() {
        // "%3C%3E" decodes to "<>", which sanitizes to nothing
        let (status, _) = get("/correlate/%3C%3E").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_timeline_and_raw_records() {
        let (status, body) = get("/correlate/flow-1/timeline").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["timeline"].as_array().unwrap().len(), 2);

        let (_, body) = get("/correlate/flow-1/traces").await;
        assert_eq!(body["count"], 1);
        let (_, body) = get("/correlate/flow-1/logs").await;
        assert_eq!(body["logs"][0]["body"], "card declined");
    }

    #[tokio::test]
    async fn test_raw_endpoints_echo_sanitized_id() {
        // "flow-1%3Cscript%3E" decodes to "flow-1<script>"
        let (status, body) = get("/correlate/flow-1%3Cscript%3E/traces").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["correlation_id"], "flow-1script");
        assert_eq!(body["count"], 0);

        let (_, body) = get("/correlate/flow-1%27/logs").await;
        assert_eq!(body["correlation_id"], "flow-1");
        assert_eq!(body["count"], 1);

        let (status, body) = get("/correlate/flow-1%3B/timeline").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["correlation_id"], "flow-1");

        let (status, _) = get("/correlate/%3C%3E/traces").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_rca_endpoint() {
        let request = Request::builder()
            .uri("/rca")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"correlation_id":"flow-1"}"#))
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
        // One failing span and no anomaly cannot justify a cause
        assert_eq!(body["status"], "inconclusive");
        assert!(body["reason"].is_string());
    }

    #[tokio::test]
    async fn test_rca_unknown_id_is_404() {
        let request = Request::builder()
            .uri("/rca")
            .method("POST")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"correlation_id":"nope"}"#))
            .unwrap();
        let response = router(state()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health_and_metrics() {
        let (status, body) = get("/api/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");

        let (_, body) = get("/api/cardinality").await;
        assert_eq!(body["enabled"], true);
        assert_eq!(body["attributes"][0]["attribute"], "http.route");

        let response = router(state())
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let text = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(String::from_utf8_lossy(&text).contains("olly_uptime_seconds"));
    }
}
