//! Log records

use super::Attributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single log entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: DateTime<Utc>,

    pub service: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,

    #[serde(default)]
    pub severity: Severity,

    /// Log body; structured loggers put a JSON object here
    #[serde(default)]
    pub body: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baggage: Option<String>,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub attributes: Attributes,

    #[serde(default, skip_serializing_if = "Attributes::is_empty")]
    pub resource: Attributes,
}

impl LogRecord {
    pub fn new(service: impl Into<String>, severity: Severity, body: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            service: service.into(),
            trace_id: None,
            span_id: None,
            severity,
            body: body.into(),
            baggage: None,
            attributes: Attributes::new(),
            resource: Attributes::new(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity >= Severity::Error
    }

    /// Parse the body as a JSON object, if it is one
    pub fn json_body(&self) -> Option<serde_json::Map<String, serde_json::Value>> {
        let trimmed = self.body.trim_start();
        if !trimmed.starts_with('{') {
            return None;
        }
        match serde_json::from_str::<serde_json::Value>(trimmed) {
            Ok(serde_json::Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// Log severity, ordered from least to most severe
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
    Fatal,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Trace => "TRACE",
            Severity::Debug => "DEBUG",
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
            Severity::Fatal => "FATAL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Fatal > Severity::Error);
        assert!(Severity::Warn < Severity::Error);

        let log = LogRecord::new("orders", Severity::Fatal, "boom", Utc::now());
        assert!(log.is_error());
        let log = LogRecord::new("orders", Severity::Warn, "slow", Utc::now());
        assert!(!log.is_error());
    }

    #[test]
    fn test_json_body() {
        let log = LogRecord::new(
            "orders",
            Severity::Info,
            r#"{"msg":"reserved","correlationId":"olly-abc-12345678"}"#,
            Utc::now(),
        );
        let body = log.json_body().unwrap();
        assert_eq!(body["correlationId"], "olly-abc-12345678");

        let plain = LogRecord::new("orders", Severity::Info, "reserved 3 items", Utc::now());
        assert!(plain.json_body().is_none());
    }
}
