//! Telemetry record types
//!
//! Already-decoded spans, log entries and metric points as handed over by the
//! transport layer. The enrichment stage stamps them with a correlation id;
//! after that they are treated as immutable.

mod log;
mod metric;
mod span;

pub use log::{LogRecord, Severity};
pub use metric::{Exemplar, MetricPoint};
pub use span::{SpanRecord, SpanStatus};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// String attribute map shared by all record kinds
pub type Attributes = HashMap<String, String>;

/// One telemetry record of any signal type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TelemetryRecord {
    Span(SpanRecord),
    Log(LogRecord),
    Metric(MetricPoint),
}

/// Signal type of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    Span,
    Log,
    Metric,
}

impl TelemetryRecord {
    pub fn kind(&self) -> SignalKind {
        match self {
            TelemetryRecord::Span(_) => SignalKind::Span,
            TelemetryRecord::Log(_) => SignalKind::Log,
            TelemetryRecord::Metric(_) => SignalKind::Metric,
        }
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TelemetryRecord::Span(s) => s.timestamp,
            TelemetryRecord::Log(l) => l.timestamp,
            TelemetryRecord::Metric(m) => m.timestamp,
        }
    }

    pub fn service(&self) -> &str {
        match self {
            TelemetryRecord::Span(s) => &s.service,
            TelemetryRecord::Log(l) => &l.service,
            TelemetryRecord::Metric(m) => &m.service,
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        match self {
            TelemetryRecord::Span(s) => s.trace_id.as_deref(),
            TelemetryRecord::Log(l) => l.trace_id.as_deref(),
            TelemetryRecord::Metric(m) => m.trace_id.as_deref(),
        }
    }

    pub fn span_id(&self) -> Option<&str> {
        match self {
            TelemetryRecord::Span(s) => s.span_id.as_deref(),
            TelemetryRecord::Log(l) => l.span_id.as_deref(),
            TelemetryRecord::Metric(m) => m.span_id.as_deref(),
        }
    }

    /// W3C baggage header carried alongside the record, if any
    pub fn baggage(&self) -> Option<&str> {
        match self {
            TelemetryRecord::Span(s) => s.baggage.as_deref(),
            TelemetryRecord::Log(l) => l.baggage.as_deref(),
            TelemetryRecord::Metric(m) => m.baggage.as_deref(),
        }
    }

    pub fn attributes(&self) -> &Attributes {
        match self {
            TelemetryRecord::Span(s) => &s.attributes,
            TelemetryRecord::Log(l) => &l.attributes,
            TelemetryRecord::Metric(m) => &m.attributes,
        }
    }

    pub fn attributes_mut(&mut self) -> &mut Attributes {
        match self {
            TelemetryRecord::Span(s) => &mut s.attributes,
            TelemetryRecord::Log(l) => &mut l.attributes,
            TelemetryRecord::Metric(m) => &mut m.attributes,
        }
    }

    /// Resource-level attributes (service-wide, checked before record attributes)
    pub fn resource(&self) -> &Attributes {
        match self {
            TelemetryRecord::Span(s) => &s.resource,
            TelemetryRecord::Log(l) => &l.resource,
            TelemetryRecord::Metric(m) => &m.resource,
        }
    }

    pub fn resource_mut(&mut self) -> &mut Attributes {
        match self {
            TelemetryRecord::Span(s) => &mut s.resource,
            TelemetryRecord::Log(l) => &mut l.resource,
            TelemetryRecord::Metric(m) => &mut m.resource,
        }
    }

    /// Read a string attribute from the record attributes
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes().get(key).map(String::as_str)
    }
}

impl From<SpanRecord> for TelemetryRecord {
    fn from(span: SpanRecord) -> Self {
        TelemetryRecord::Span(span)
    }
}

impl From<LogRecord> for TelemetryRecord {
    fn from(log: LogRecord) -> Self {
        TelemetryRecord::Log(log)
    }
}

impl From<MetricPoint> for TelemetryRecord {
    fn from(metric: MetricPoint) -> Self {
        TelemetryRecord::Metric(metric)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serde_tagging() {
        let json = r#"{
            "type": "span",
            "timestamp": "2026-01-01T00:00:00Z",
            "service": "checkout",
            "trace_id": "4bf92f3577b34da6a3ce929d0e0e4736",
            "span_id": "00f067aa0ba902b7",
            "name": "POST /cart",
            "duration_ms": 12.5,
            "status": "error"
        }"#;

        let record: TelemetryRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.kind(), SignalKind::Span);
        assert_eq!(record.service(), "checkout");
        assert_eq!(record.trace_id(), Some("4bf92f3577b34da6a3ce929d0e0e4736"));
        assert!(record.attributes().is_empty());

        match record {
            TelemetryRecord::Span(span) => {
                assert_eq!(span.status, SpanStatus::Error);
                assert!(span.is_error());
            }
            other => panic!("expected span, got {:?}", other.kind()),
        }
    }

    #[test]
    fn test_log_and_metric_tagging() {
        let log: TelemetryRecord = serde_json::from_str(
            r#"{"type":"log","timestamp":"2026-01-01T00:00:01Z","service":"orders","severity":"error","body":"db timeout"}"#,
        )
        .unwrap();
        assert_eq!(log.kind(), SignalKind::Log);

        let metric: TelemetryRecord = serde_json::from_str(
            r#"{"type":"metric","timestamp":"2026-01-01T00:00:02Z","service":"db","name":"db.pool.wait_ms","value":480.0,"baseline":5.0}"#,
        )
        .unwrap();
        assert_eq!(metric.kind(), SignalKind::Metric);
        assert!(metric.trace_id().is_none());
    }
}
