//! Storage gateway boundary
//!
//! The engine needs exactly one capability from storage: fetch every record
//! of a signal type carrying a given correlation id, ordered by timestamp.
//! Indexing and retention belong to the storage side.

use crate::error::StorageResult;
use async_trait::async_trait;
use olly_core::correlation_id::CorrelationId;
use olly_core::telemetry::{LogRecord, MetricPoint, SpanRecord};

/// Indexed lookup by correlation id
#[async_trait]
pub trait StorageGateway: Send + Sync {
    /// Backend name for logs and diagnostics
    fn name(&self) -> &str;

    /// Spans carrying the id, ascending by start time
    async fn fetch_spans(&self, id: &CorrelationId) -> StorageResult<Vec<SpanRecord>>;

    /// Log records carrying the id, ascending by timestamp
    async fn fetch_logs(&self, id: &CorrelationId) -> StorageResult<Vec<LogRecord>>;

    /// Metric points linked to the id through attributes or exemplars
    async fn fetch_exemplars(&self, id: &CorrelationId) -> StorageResult<Vec<MetricPoint>>;
}
