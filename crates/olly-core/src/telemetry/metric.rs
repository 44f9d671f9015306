//! Metric data points and exemplars

use super::Attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single metric observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,

    pub service: String,

    /// Metric name (e.g. "db.pool.wait_ms")
    pub name: String,

    pub value: f64,

    /// Expected value for this series, if the producer knows it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline: Option<f64>,

    /// Producer-side anomaly score in [0, 1]
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anomaly_score: Option<f64>,

    /// Trace active when the point was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Span active when the point was recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    /// Link from this point to the span it was recorded under
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exemplar: Option<Exemplar>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baggage: Option<String>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub resource: Attributes,
}

impl MetricPoint {
    pub fn new(service: impl Into<String>, name: impl Into<String>, value: f64, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            service: service.into(),
            name: name.into(),
            value,
            baseline: None,
            anomaly_score: None,
            trace_id: None,
            span_id: None,
            exemplar: None,
            baggage: None,
            attributes: Attributes::new(),
            resource: Attributes::new(),
        }
    }

    /// True when the point was recorded while a span was active
    pub fn has_active_span(&self) -> bool {
        matches!((&self.trace_id, &self.span_id), (Some(t), Some(s)) if !t.is_empty() && !s.is_empty())
    }
}

/// Sample linking a metric point to a specific trace/span
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exemplar {
    pub trace_id: String,
    pub span_id: String,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub filtered_attributes: Attributes,
}

impl Exemplar {
    pub fn new(trace_id: impl Into<String>, span_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            span_id: span_id.into(),
            filtered_attributes: Attributes::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_span_detection() {
        let mut point = MetricPoint::new("db", "db.pool.wait_ms", 4.0, Utc::now());
        assert!(!point.has_active_span());

        point.trace_id = Some("4bf92f3577b34da6a3ce929d0e0e4736".to_string());
        assert!(!point.has_active_span());

        point.span_id = Some(String::new());
        assert!(!point.has_active_span());

        point.span_id = Some("00f067aa0ba902b7".to_string());
        assert!(point.has_active_span());
    }
}
