//! Correlated context types
//!
//! A `CorrelatedContext` is the unified cross-signal view for one correlation
//! id. It is derived on demand and never persisted.

use crate::telemetry::{LogRecord, MetricPoint, SpanRecord};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unified view of everything recorded under one correlation id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelatedContext {
    pub correlation_id: String,

    pub time_range: TimeRange,

    pub summary: ContextSummary,

    /// Events from all signals, ascending by timestamp
    pub timeline: Vec<TimelineEvent>,

    /// Cross-service call edges derived from parent/child spans
    pub dependencies: Vec<ServiceDependencyEdge>,

    /// Service of the earliest span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_service: Option<String>,

    /// Operation of the earliest span
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_operation: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spans: Vec<SpanRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub logs: Vec<LogRecord>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metrics: Vec<MetricPoint>,

    /// Non-fatal problems hit while assembling the context
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<PartialDataWarning>,

    /// True when any sub-query degraded to an empty result
    #[serde(default)]
    pub partial: bool,
}

impl CorrelatedContext {
    /// Record a degraded sub-query
    pub fn add_warning(&mut self, warning: PartialDataWarning) {
        self.warnings.push(warning);
        self.partial = true;
    }

    /// Wall-clock extent of the records, span ends included
    pub fn duration_ms(&self) -> f64 {
        self.time_range.duration_ms()
    }
}

/// Inclusive time range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        if end < start {
            Self { start: end, end: start }
        } else {
            Self { start, end }
        }
    }

    pub fn duration_ms(&self) -> f64 {
        (self.end - self.start).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts <= self.end
    }
}

/// Summary counts for a context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContextSummary {
    pub total_spans: usize,
    pub total_logs: usize,
    pub total_metrics: usize,

    /// Error spans plus error/fatal logs
    pub error_count: usize,

    pub anomaly_count: usize,

    pub service_count: usize,

    /// Distinct services, sorted
    pub services: Vec<String>,

    /// Last timeline event minus first
    pub duration_ms: f64,

    pub has_errors: bool,
}

/// Kind of timeline event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineEventKind {
    Span,
    Log,
    MetricAnomaly,
}

/// One entry in the merged timeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: DateTime<Utc>,

    pub kind: TimelineEventKind,

    pub service: String,

    pub description: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<f64>,

    pub is_error: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Metric name for anomaly events
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<String>,
}

/// Caller to callee edge between two services
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDependencyEdge {
    pub source: String,
    pub target: String,
    pub request_count: u64,

    /// Fraction of callee spans that failed, in [0, 1]
    pub error_rate: f64,

    pub avg_latency_ms: f64,
}

/// Which sub-query degraded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningSource {
    Logs,
    Metrics,
}

/// Non-fatal gap in a context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartialDataWarning {
    pub source: WarningSource,
    pub message: String,
}

impl PartialDataWarning {
    pub fn new(source: WarningSource, message: impl Into<String>) -> Self {
        Self {
            source,
            message: message.into(),
        }
    }
}
