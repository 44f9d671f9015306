//! OllyStack - cross-signal correlation engine
//!
//! Stamps traces, logs and metrics with a shared correlation id, assembles
//! the unified context for one id and explains what went wrong in it.

use anyhow::Context as _;
use chrono::Utc;
use clap::{Parser, Subcommand};
use olly_core::config::{ConfigLoader, OllyConfig};
use olly_core::metrics::{create_metrics, SharedMetrics};
use olly_core::pipeline::{Pipeline, PipelineConfig};
use olly_core::plugins::{BatchProcessor, RecordSink};
use olly_core::telemetry::TelemetryRecord;
use olly_correlate::{read_records, JsonlSink, JsonlSinkConfig, MemoryStore, QueryEngine};
use olly_enrich::EnrichmentStage;
use olly_rca::{LlmNarrator, RcaService, RootCauseAnalyzer};
use olly_web::{AppState, WebConfig};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Interval between retention sweeps of the in-memory store
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "ollystack")]
#[command(version)]
#[command(about = "Correlate traces, logs and metrics by correlation id", long_about = None)]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Log format (text, json); overrides the config file
    #[arg(short, long)]
    format: Option<String>,

    /// Path to configuration file
    #[arg(short, long, global = true, env = "OLLY_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load records and serve the correlation API
    Serve {
        /// JSONL record files to ingest at startup (repeatable)
        #[arg(short, long)]
        data: Vec<PathBuf>,

        /// Host to bind
        #[arg(long)]
        host: Option<String>,

        /// Port to bind
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Enrich a JSONL record file and write the result
    Enrich {
        /// Input JSONL file
        #[arg(short, long)]
        input: PathBuf,

        /// Output JSONL file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Print the correlated context for one id
    Correlate {
        /// Input JSONL file
        #[arg(short, long)]
        input: PathBuf,

        /// Correlation id
        #[arg(long)]
        id: String,

        /// Print only the timeline
        #[arg(long)]
        timeline: bool,
    },

    /// Run root-cause analysis for one id
    Analyze {
        /// Input JSONL file
        #[arg(short, long)]
        input: PathBuf,

        /// Correlation id
        #[arg(long)]
        id: String,
    },

    /// Show the effective configuration
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let loaded = ConfigLoader::new().with_cli_path(cli.config.clone()).load();
    let config = match &loaded {
        Ok(config) => config.clone(),
        Err(_) => OllyConfig::default(),
    };

    init_logging(cli.verbose, cli.format.as_deref(), &config)?;
    if let Err(e) = loaded {
        warn!("Failed to load configuration: {}, using defaults", e);
    }

    match cli.command {
        Commands::Serve { data, host, port } => {
            let mut config = config;
            if let Some(host) = host {
                config.web.host = host;
            }
            if let Some(port) = port {
                config.web.port = port;
            }
            config
                .storage
                .data_files
                .extend(data.into_iter().map(|p| p.display().to_string()));
            serve_command(config).await
        }
        Commands::Enrich { input, output } => enrich_command(&config, &input, &output).await,
        Commands::Correlate { input, id, timeline } => {
            correlate_command(&config, &input, &id, timeline).await
        }
        Commands::Analyze { input, id } => analyze_command(&config, &input, &id).await,
        Commands::Status => status_command(&config),
    }
}

/// CLI verbosity wins over the config file; RUST_LOG wins over both
fn init_logging(verbose: u8, format: Option<&str>, config: &OllyConfig) -> anyhow::Result<()> {
    let level = match verbose {
        0 => config.server.log_level.to_lowercase(),
        1 => "info".to_string(),
        2 => "debug".to_string(),
        _ => "trace".to_string(),
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let result = match format.unwrap_or(&config.server.log_format) {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("failed to initialise logging: {}", e))
}

fn build_stage(config: &OllyConfig, metrics: &SharedMetrics) -> EnrichmentStage {
    EnrichmentStage::new(
        config.correlation.clone(),
        config.cardinality.clone(),
        metrics.clone(),
    )
}

fn build_store(config: &OllyConfig) -> MemoryStore {
    MemoryStore::new(config.correlation.attribute_name.clone())
        .with_id_prefix(config.correlation.id_prefix.clone())
        .with_retention_secs(config.storage.retention_secs)
}

fn build_engine(config: &OllyConfig, store: Arc<MemoryStore>, metrics: &SharedMetrics) -> QueryEngine {
    QueryEngine::new(store, &config.query, config.anomaly.clone(), metrics.clone())
        .with_id_prefix(config.correlation.id_prefix.clone())
}

fn build_rca(config: &OllyConfig, metrics: &SharedMetrics) -> RcaService {
    let analyzer = RootCauseAnalyzer::new(config.rca.clone(), config.anomaly.clone());
    let service = RcaService::new(analyzer, metrics.clone());

    if !config.narrator.enabled {
        return service;
    }
    match LlmNarrator::new(&config.narrator) {
        Ok(narrator) => {
            info!("Narrator enabled: {} ({})", config.narrator.model, config.narrator.endpoint);
            service.with_narrator(
                Arc::new(narrator),
                Duration::from_millis(config.narrator.timeout_ms),
            )
        }
        Err(e) => {
            warn!("Narrator disabled: {}", e);
            service
        }
    }
}

/// Enrich `input` into a fresh store, for the one-shot commands
async fn load_offline(
    config: &OllyConfig,
    input: &Path,
    metrics: &SharedMetrics,
) -> anyhow::Result<Arc<MemoryStore>> {
    let records = read_records(input).with_context(|| format!("reading {}", input.display()))?;
    let store = Arc::new(build_store(config).with_retention_secs(0));

    let mut pipeline = Pipeline::new(PipelineConfig::default());
    pipeline.add_processor(Arc::new(build_stage(config, metrics)));
    pipeline.add_sink(store.clone());
    pipeline.run_batch(records).await;

    Ok(store)
}

async fn serve_command(config: OllyConfig) -> anyhow::Result<()> {
    info!("Starting OllyStack v{}", env!("CARGO_PKG_VERSION"));
    let metrics = create_metrics();

    let stage = Arc::new(build_stage(&config, &metrics));
    let store = Arc::new(build_store(&config));

    let mut pipeline = Pipeline::new(PipelineConfig::default());
    pipeline.add_processor(stage.clone());
    pipeline.add_sink(store.clone());

    for file in &config.storage.data_files {
        match read_records(file) {
            Ok(records) => {
                let count = records.len();
                pipeline.run_batch(records).await;
                info!("Ingested {} records from {}", count, file);
            }
            Err(e) => error!("Failed to load {}: {}", file, e),
        }
    }
    info!(
        "Store holds {} records across {} correlation ids ({} without id)",
        store.stored(),
        store.flow_count(),
        store.unindexed()
    );

    let guard = stage.guard();
    let sweeper = guard.as_ref().map(|g| {
        g.spawn_sweeper(Duration::from_secs(config.cardinality.sweep_interval_secs.max(1)))
    });

    let purger = {
        let store = store.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(PURGE_INTERVAL);
            loop {
                ticker.tick().await;
                let purged = store.purge_expired(Utc::now());
                if purged > 0 {
                    info!("Purged {} expired records", purged);
                }
            }
        })
    };

    let state = Arc::new(AppState {
        engine: Arc::new(build_engine(&config, store.clone(), &metrics)),
        rca: Arc::new(build_rca(&config, &metrics)),
        metrics: metrics.clone(),
        guard,
    });

    if config.web.enabled {
        let web_config = WebConfig::from(&config.web);
        tokio::select! {
            result = olly_web::start_server(web_config, state) => {
                if let Err(e) = result {
                    error!("Web server error: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
            }
        }
    } else {
        info!("HTTP API disabled; waiting for Ctrl+C");
        tokio::signal::ctrl_c().await?;
    }

    purger.abort();
    if let Some(sweeper) = sweeper {
        sweeper.abort();
    }
    info!("OllyStack stopped");

    Ok(())
}

async fn enrich_command(config: &OllyConfig, input: &Path, output: &Path) -> anyhow::Result<()> {
    let metrics = create_metrics();
    let records: Vec<TelemetryRecord> =
        read_records(input).with_context(|| format!("reading {}", input.display()))?;

    let stage = build_stage(config, &metrics);
    let enriched = stage.process(records);

    let sink = JsonlSink::open(JsonlSinkConfig::new(output))?;
    sink.write_batch(&enriched).await?;
    sink.flush().await?;

    let e = &metrics.enrichment;
    println!("Enriched {} records into {}", sink.records_written(), output.display());
    println!(
        "  existing {}, extracted {}, derived {}, generated {}, sanitized {}, rejected {}",
        e.ids_existing.load(Ordering::Relaxed),
        e.ids_extracted.load(Ordering::Relaxed),
        e.ids_derived.load(Ordering::Relaxed),
        e.ids_generated.load(Ordering::Relaxed),
        e.ids_sanitized.load(Ordering::Relaxed),
        e.ids_rejected.load(Ordering::Relaxed),
    );
    println!(
        "  exemplars linked {}, attributes dropped {}, guard rejections {}",
        e.exemplars_linked.load(Ordering::Relaxed),
        e.attributes_dropped.load(Ordering::Relaxed),
        e.guard_rejections.load(Ordering::Relaxed),
    );

    Ok(())
}

async fn correlate_command(
    config: &OllyConfig,
    input: &Path,
    id: &str,
    timeline_only: bool,
) -> anyhow::Result<()> {
    let metrics = create_metrics();
    let store = load_offline(config, input, &metrics).await?;
    let engine = build_engine(config, store, &metrics);

    let Some(ctx) = engine.get_full_context(id).await?.found() else {
        anyhow::bail!("no telemetry found for correlation id {}", id);
    };

    let json = if timeline_only {
        serde_json::to_string_pretty(&ctx.timeline)?
    } else {
        serde_json::to_string_pretty(ctx.as_ref())?
    };
    println!("{}", json);

    Ok(())
}

async fn analyze_command(config: &OllyConfig, input: &Path, id: &str) -> anyhow::Result<()> {
    let metrics = create_metrics();
    let store = load_offline(config, input, &metrics).await?;
    let engine = build_engine(config, store, &metrics);

    let Some(ctx) = engine.get_full_context(id).await?.found() else {
        anyhow::bail!("no telemetry found for correlation id {}", id);
    };

    let outcome = build_rca(config, &metrics).run(&ctx).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    Ok(())
}

fn status_command(config: &OllyConfig) -> anyhow::Result<()> {
    println!();
    println!("OllyStack v{}", env!("CARGO_PKG_VERSION"));
    println!();

    match ConfigLoader::default_config_path() {
        Some(path) if path.exists() => println!("User config: {} (found)", path.display()),
        Some(path) => println!("User config: {} (not found)", path.display()),
        None => println!("User config: unavailable"),
    }
    println!();
    println!("Effective configuration:");
    println!();
    println!("{}", toml::to_string_pretty(config)?);

    Ok(())
}
