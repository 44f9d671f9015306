//! In-memory storage gateway
//!
//! Records are indexed by the identity key of their correlation id, so ids
//! stamped under the configured prefix that differ only in the timestamp
//! segment land in the same flow. Any other id is indexed whole.

use crate::error::StorageResult;
use crate::storage::StorageGateway;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use olly_core::correlation_id::{identity_key, CorrelationId, DEFAULT_ID_PREFIX};
use olly_core::plugins::{PluginInfo, PluginResult, RecordSink};
use olly_core::telemetry::{LogRecord, MetricPoint, SpanRecord, TelemetryRecord};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Reference storage backend
pub struct MemoryStore {
    /// Attribute holding the correlation id
    attribute_name: String,
    /// Prefix of pipeline-stamped ids
    id_prefix: String,
    spans: DashMap<String, Vec<SpanRecord>>,
    logs: DashMap<String, Vec<LogRecord>>,
    metrics: DashMap<String, Vec<MetricPoint>>,
    /// Records older than this are purged; `None` keeps everything
    retention: Option<Duration>,
    stored: AtomicU64,
    unindexed: AtomicU64,
}

impl MemoryStore {
    pub fn new(attribute_name: impl Into<String>) -> Self {
        Self {
            attribute_name: attribute_name.into(),
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
            spans: DashMap::new(),
            logs: DashMap::new(),
            metrics: DashMap::new(),
            retention: None,
            stored: AtomicU64::new(0),
            unindexed: AtomicU64::new(0),
        }
    }

    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    /// Set retention in seconds; 0 keeps records forever
    pub fn with_retention_secs(mut self, secs: u64) -> Self {
        self.retention = (secs > 0).then(|| Duration::seconds(secs.min(i64::MAX as u64 / 1000) as i64));
        self
    }

    /// Correlation id carried by a record, if any
    fn correlation_of<'a>(&self, record: &'a TelemetryRecord) -> Option<&'a str> {
        let name = self.attribute_name.as_str();
        record
            .attributes()
            .get(name)
            .or_else(|| record.resource().get(name))
            .or_else(|| match record {
                TelemetryRecord::Metric(m) => m
                    .exemplar
                    .as_ref()
                    .and_then(|e| e.filtered_attributes.get(name)),
                _ => None,
            })
            .map(String::as_str)
    }

    /// Index one record; returns false when it carries no correlation id
    pub fn insert(&self, record: TelemetryRecord) -> bool {
        let Some(key) = self
            .correlation_of(&record)
            .map(|id| identity_key(id, &self.id_prefix))
        else {
            self.unindexed.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        match record {
            TelemetryRecord::Span(span) => self.spans.entry(key).or_default().push(span),
            TelemetryRecord::Log(log) => self.logs.entry(key).or_default().push(log),
            TelemetryRecord::Metric(point) => self.metrics.entry(key).or_default().push(point),
        }
        self.stored.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Drop records older than the retention window; returns how many
    pub fn purge_expired(&self, now: DateTime<Utc>) -> usize {
        let Some(retention) = self.retention else {
            return 0;
        };
        let cutoff = now - retention;
        let mut removed = purge(&self.spans, cutoff, |s| s.timestamp);
        removed += purge(&self.logs, cutoff, |l| l.timestamp);
        removed += purge(&self.metrics, cutoff, |m| m.timestamp);
        if removed > 0 {
            debug!("Purged {} expired records", removed);
        }
        removed
    }

    /// Number of distinct correlation flows with at least one span or log
    pub fn flow_count(&self) -> usize {
        let mut keys: Vec<String> = self.spans.iter().map(|e| e.key().clone()).collect();
        keys.extend(self.logs.iter().map(|e| e.key().clone()));
        keys.sort();
        keys.dedup();
        keys.len()
    }

    pub fn stored(&self) -> u64 {
        self.stored.load(Ordering::Relaxed)
    }

    pub fn unindexed(&self) -> u64 {
        self.unindexed.load(Ordering::Relaxed)
    }
}

fn purge<T>(map: &DashMap<String, Vec<T>>, cutoff: DateTime<Utc>, ts: impl Fn(&T) -> DateTime<Utc>) -> usize {
    let mut removed = 0;
    map.retain(|_, records| {
        let before = records.len();
        records.retain(|r| ts(r) >= cutoff);
        removed += before - records.len();
        !records.is_empty()
    });
    removed
}

fn sorted<T: Clone>(map: &DashMap<String, Vec<T>>, key: &str, ts: impl Fn(&T) -> DateTime<Utc>) -> Vec<T> {
    let mut records = map.get(key).map(|r| r.value().clone()).unwrap_or_default();
    records.sort_by_key(|r| ts(r));
    records
}

#[async_trait]
impl StorageGateway for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn fetch_spans(&self, id: &CorrelationId) -> StorageResult<Vec<SpanRecord>> {
        Ok(sorted(&self.spans, &id.identity_key(&self.id_prefix), |s| s.timestamp))
    }

    async fn fetch_logs(&self, id: &CorrelationId) -> StorageResult<Vec<LogRecord>> {
        Ok(sorted(&self.logs, &id.identity_key(&self.id_prefix), |l| l.timestamp))
    }

    async fn fetch_exemplars(&self, id: &CorrelationId) -> StorageResult<Vec<MetricPoint>> {
        Ok(sorted(&self.metrics, &id.identity_key(&self.id_prefix), |m| m.timestamp))
    }
}

impl PluginInfo for MemoryStore {
    fn name(&self) -> &str {
        "memory-store"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Indexes records by correlation id in memory"
    }
}

#[async_trait]
impl RecordSink for MemoryStore {
    async fn write_batch(&self, records: &[TelemetryRecord]) -> PluginResult<()> {
        for record in records {
            self.insert(record.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use olly_core::telemetry::{Exemplar, Severity};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn span(id: &str, ms: i64) -> TelemetryRecord {
        let mut s = SpanRecord::new("orders", "reserve", t(ms));
        s.attributes.insert("correlation_id".into(), id.into());
        s.into()
    }

    #[tokio::test]
    async fn test_fetch_sorted_by_timestamp() {
        let store = MemoryStore::new("correlation_id");
        store.insert(span("olly-k1-0badf00d", 300));
        store.insert(span("olly-k1-0badf00d", 100));
        store.insert(span("olly-k1-0badf00d", 200));

        let id = CorrelationId::parse("olly-k1-0badf00d").unwrap();
        let spans = store.fetch_spans(&id).await.unwrap();
        let times: Vec<_> = spans.iter().map(|s| s.timestamp).collect();
        assert_eq!(times, vec![t(100), t(200), t(300)]);
    }

    #[tokio::test]
    async fn test_timestamp_segment_ignored() {
        let store = MemoryStore::new("correlation_id");
        store.insert(span("olly-k1-0badf00d", 100));
        store.insert(span("olly-k2-0badf00d", 200));

        let id = CorrelationId::parse("olly-zz-0badf00d").unwrap();
        assert_eq!(store.fetch_spans(&id).await.unwrap().len(), 2);
        assert_eq!(store.flow_count(), 1);
    }

    #[tokio::test]
    async fn test_foreign_ids_stay_separate() {
        let store = MemoryStore::new("correlation_id");
        let mut checkout = SpanRecord::new("checkout", "POST /checkout", t(0));
        checkout.attributes.insert("correlation_id".into(), "order-123-deadbeef".into());
        store.insert(checkout.into());
        let mut refunds = SpanRecord::new("refunds", "POST /refund", t(10));
        refunds.attributes.insert("correlation_id".into(), "order-456-deadbeef".into());
        store.insert(refunds.into());

        let id = CorrelationId::parse("order-123-deadbeef").unwrap();
        let spans = store.fetch_spans(&id).await.unwrap();
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].service, "checkout");
        assert_eq!(store.flow_count(), 2);
    }

    #[tokio::test]
    async fn test_custom_prefix_collapses_only_its_ids() {
        let store = MemoryStore::new("correlation_id").with_id_prefix("shop");
        store.insert(span("shop-k1-0badf00d", 0));
        store.insert(span("shop-k2-0badf00d", 1));
        store.insert(span("olly-k1-0badf00d", 2));
        store.insert(span("olly-k2-0badf00d", 3));

        let shop = CorrelationId::parse("shop-k9-0badf00d").unwrap();
        assert_eq!(store.fetch_spans(&shop).await.unwrap().len(), 2);
        let olly = CorrelationId::parse("olly-k1-0badf00d").unwrap();
        assert_eq!(store.fetch_spans(&olly).await.unwrap().len(), 1);
        assert_eq!(store.flow_count(), 3);
    }

    #[tokio::test]
    async fn test_exemplar_and_resource_indexing() {
        let store = MemoryStore::new("correlation_id");

        let mut point = MetricPoint::new("db", "db.pool.wait_ms", 480.0, t(0));
        let mut exemplar = Exemplar::new("trace", "span");
        exemplar.filtered_attributes.insert("correlation_id".into(), "flow-1".into());
        point.exemplar = Some(exemplar);
        assert!(store.insert(point.into()));

        let mut log = LogRecord::new("orders", Severity::Error, "boom", t(5));
        log.resource.insert("correlation_id".into(), "flow-1".into());
        assert!(store.insert(log.into()));

        let bare = LogRecord::new("orders", Severity::Info, "no id", t(6));
        assert!(!store.insert(bare.into()));
        assert_eq!(store.unindexed(), 1);

        let id = CorrelationId::parse("flow-1").unwrap();
        assert_eq!(store.fetch_exemplars(&id).await.unwrap().len(), 1);
        assert_eq!(store.fetch_logs(&id).await.unwrap().len(), 1);
        assert!(store.fetch_spans(&id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_retention_purge() {
        let store = MemoryStore::new("correlation_id").with_retention_secs(60);
        store.insert(span("flow-1", 0));
        store.insert(span("flow-1", 90_000));
        store.insert(span("flow-2", 10));

        let removed = store.purge_expired(t(120_000));
        assert_eq!(removed, 2);
        assert_eq!(store.flow_count(), 1);

        let forever = MemoryStore::new("correlation_id").with_retention_secs(0);
        forever.insert(span("flow-1", 0));
        assert_eq!(forever.purge_expired(t(10_000_000)), 0);
    }

    #[tokio::test]
    async fn test_record_sink() {
        let store = MemoryStore::new("correlation_id");
        store
            .write_batch(&[span("flow-1", 0), span("flow-1", 1)])
            .await
            .unwrap();
        assert_eq!(store.stored(), 2);
    }
}
