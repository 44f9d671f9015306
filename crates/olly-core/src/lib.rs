//! Olly Core - telemetry types, correlation ids, plugin traits and pipeline
//!
//! This crate provides the foundational types shared by the correlation engine:
//!
//! - **Telemetry**: decoded spans, log records and metric points
//! - **Correlation ids**: validation and sanitization
//! - **Context**: the unified cross-signal view for one correlation id
//! - **Plugins / Pipeline**: batch processors and record sinks
//! - **Config / Metrics**: configuration loading and self-metrics

pub mod anomaly;
pub mod config;
pub mod context;
pub mod correlation_id;
pub mod metrics;
pub mod pipeline;
pub mod plugins;
pub mod telemetry;

// Re-export commonly used types
pub use anomaly::AnomalyConfig;
pub use config::{ConfigError, ConfigLoader, OllyConfig};
pub use context::{
    ContextSummary, CorrelatedContext, PartialDataWarning, ServiceDependencyEdge, TimeRange,
    TimelineEvent, TimelineEventKind, WarningSource,
};
pub use correlation_id::{validate, CorrelationId, IdSource, Validated, ValidationError};
pub use metrics::{MetricsCollector, SharedMetrics};
pub use pipeline::{Pipeline, PipelineConfig};
pub use plugins::{BatchProcessor, PluginError, PluginInfo, PluginResult, RecordSink};
pub use telemetry::{
    Attributes, Exemplar, LogRecord, MetricPoint, Severity, SignalKind, SpanRecord, SpanStatus,
    TelemetryRecord,
};

/// Engine version
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
