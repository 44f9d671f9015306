//! Span records

use super::Attributes;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// One operation within a trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpanRecord {
    /// Span start time
    pub timestamp: DateTime<Utc>,

    /// Emitting service
    pub service: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,

    /// Operation name
    pub name: String,

    /// Duration in milliseconds
    #[serde(default)]
    pub duration_ms: f64,

    #[serde(default)]
    pub status: SpanStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_message: Option<String>,

    /// W3C baggage header (`key=value,key2=value2`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baggage: Option<String>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub resource: Attributes,
}

impl SpanRecord {
    pub fn new(service: impl Into<String>, name: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            service: service.into(),
            trace_id: None,
            span_id: None,
            parent_span_id: None,
            name: name.into(),
            duration_ms: 0.0,
            status: SpanStatus::Unset,
            status_message: None,
            baggage: None,
            attributes: Attributes::new(),
            resource: Attributes::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.status == SpanStatus::Error
    }

    /// Start time plus duration
    pub fn end_time(&self) -> DateTime<Utc> {
        self.timestamp + Duration::microseconds((self.duration_ms * 1000.0).round() as i64)
    }
}

/// Span status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpanStatus {
    #[default]
    Unset,
    Ok,
    Error,
}
