//! Correlation query engine
//!
//! Reads through the context cache, otherwise fans out to the storage
//! gateway for spans, logs and metric exemplars in parallel under one
//! deadline, then assembles the context.
//!
//! Failure policy: the span query is the skeleton of a context, so its
//! failure or timeout fails the request. Log and metric failures degrade to
//! empty result sets and are reported as warnings on the context.

use crate::cache::ContextCache;
use crate::error::{CorrelationError, StorageError, StorageResult};
use crate::storage::StorageGateway;
use crate::timeline::build_context;
use olly_core::anomaly::AnomalyConfig;
use olly_core::config::QuerySettings;
use olly_core::context::{CorrelatedContext, PartialDataWarning, TimelineEvent, WarningSource};
use olly_core::correlation_id::{validate, CorrelationId, IdSource, DEFAULT_ID_PREFIX};
use olly_core::metrics::SharedMetrics;
use olly_core::telemetry::{LogRecord, SpanRecord};
use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Result of a context lookup
#[derive(Debug, Clone)]
pub enum ContextLookup {
    Found(Arc<CorrelatedContext>),
    /// Valid id with no spans and no logs
    NotFound,
}

impl ContextLookup {
    pub fn found(self) -> Option<Arc<CorrelatedContext>> {
        match self {
            ContextLookup::Found(ctx) => Some(ctx),
            ContextLookup::NotFound => None,
        }
    }
}

/// Outcome of one bounded sub-query
enum SubQuery<T> {
    Ok(Vec<T>),
    Failed(StorageError),
    TimedOut,
}

async fn bounded<T, F>(deadline: Instant, fut: F) -> SubQuery<T>
where
    F: Future<Output = StorageResult<Vec<T>>>,
{
    match timeout_at(deadline, fut).await {
        Ok(Ok(records)) => SubQuery::Ok(records),
        Ok(Err(e)) => SubQuery::Failed(e),
        Err(_) => SubQuery::TimedOut,
    }
}

/// Builds and caches correlated contexts
pub struct QueryEngine {
    storage: Arc<dyn StorageGateway>,
    cache: ContextCache,
    timeout: Duration,
    anomaly: AnomalyConfig,
    metrics: SharedMetrics,
    /// Prefix of pipeline-stamped ids, for cache keys
    id_prefix: String,
}

impl QueryEngine {
    pub fn new(
        storage: Arc<dyn StorageGateway>,
        settings: &QuerySettings,
        anomaly: AnomalyConfig,
        metrics: SharedMetrics,
    ) -> Self {
        Self {
            storage,
            cache: ContextCache::new(
                Duration::from_secs(settings.cache_ttl_secs),
                settings.cache_max_entries,
            ),
            timeout: Duration::from_millis(settings.timeout_ms),
            anomaly,
            metrics,
            id_prefix: DEFAULT_ID_PREFIX.to_string(),
        }
    }

    /// Must match the prefix the storage gateway keys on
    pub fn with_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.id_prefix = prefix.into();
        self
    }

    pub fn cache(&self) -> &ContextCache {
        &self.cache
    }

    pub fn storage_name(&self) -> &str {
        self.storage.name()
    }

    /// Validate a caller-supplied id with the sanitizing policy
    pub fn accept_id(&self, raw: &str) -> Result<CorrelationId, CorrelationError> {
        match validate(raw, IdSource::External) {
            Ok(validated) => {
                if let Some(reason) = &validated.sanitized_from {
                    warn!("Sanitized requested correlation id ({}): {:?} -> {}", reason, raw, validated.id);
                }
                Ok(validated.id)
            }
            Err(e) => {
                self.metrics.query.validation_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Rejected requested correlation id {:?}: {}", raw, e);
                Err(e.into())
            }
        }
    }

    /// Full context for one correlation id
    pub async fn get_full_context(&self, raw_id: &str) -> Result<ContextLookup, CorrelationError> {
        self.metrics.query.requests.fetch_add(1, Ordering::Relaxed);
        let id = self.accept_id(raw_id)?;
        let key = id.identity_key(&self.id_prefix);

        if let Some(ctx) = self.cache.get(&key) {
            self.metrics.query.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!("Context cache hit for {}", id);
            return Ok(ContextLookup::Found(ctx));
        }
        self.metrics.query.cache_misses.fetch_add(1, Ordering::Relaxed);

        let deadline = Instant::now() + self.timeout;
        let (spans, logs, metrics) = tokio::join!(
            bounded(deadline, self.storage.fetch_spans(&id)),
            bounded(deadline, self.storage.fetch_logs(&id)),
            bounded(deadline, self.storage.fetch_exemplars(&id)),
        );

        let spans = match spans {
            SubQuery::Ok(spans) => spans,
            SubQuery::TimedOut => {
                self.metrics.query.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("Span query for {} exceeded {:?}", id, self.timeout);
                return Err(CorrelationError::UpstreamTimeout {
                    budget_ms: self.timeout.as_millis() as u64,
                });
            }
            SubQuery::Failed(e) => {
                self.metrics.query.storage_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Span query for {} failed: {}", id, e);
                return Err(CorrelationError::Storage(e));
            }
        };

        let mut warnings = Vec::new();
        let logs = self.degrade(logs, WarningSource::Logs, &id, &mut warnings);
        let metrics = self.degrade(metrics, WarningSource::Metrics, &id, &mut warnings);

        if spans.is_empty() && logs.is_empty() {
            self.metrics.query.not_found.fetch_add(1, Ordering::Relaxed);
            debug!("No spans or logs for {}", id);
            return Ok(ContextLookup::NotFound);
        }

        let mut ctx = build_context(id.as_str(), spans, logs, metrics, &self.anomaly);
        for warning in warnings {
            ctx.add_warning(warning);
        }
        if ctx.partial {
            self.metrics.query.partial.fetch_add(1, Ordering::Relaxed);
        }

        info!(
            "Built context {}: {} spans, {} logs, {} metrics{}",
            id,
            ctx.summary.total_spans,
            ctx.summary.total_logs,
            ctx.summary.total_metrics,
            if ctx.partial { " (partial)" } else { "" }
        );

        let ctx = Arc::new(ctx);
        self.cache.insert(key, Arc::clone(&ctx));
        Ok(ContextLookup::Found(ctx))
    }

    /// Turn a failed log or metric sub-query into an empty set plus a warning
    fn degrade<T>(
        &self,
        result: SubQuery<T>,
        source: WarningSource,
        id: &CorrelationId,
        warnings: &mut Vec<PartialDataWarning>,
    ) -> Vec<T> {
        let message = match result {
            SubQuery::Ok(records) => return records,
            SubQuery::Failed(e) => format!("{:?} query failed: {}", source, e),
            SubQuery::TimedOut => {
                self.metrics.query.timeouts.fetch_add(1, Ordering::Relaxed);
                format!("{:?} query exceeded {}ms", source, self.timeout.as_millis())
            }
        };
        warn!("Partial context for {}: {}", id, message);
        warnings.push(PartialDataWarning::new(source, message));
        Vec::new()
    }

    /// Ordered timeline for one correlation id
    pub async fn get_timeline(&self, raw_id: &str) -> Result<Option<Vec<TimelineEvent>>, CorrelationError> {
        Ok(self
            .get_full_context(raw_id)
            .await?
            .found()
            .map(|ctx| ctx.timeline.clone()))
    }

    /// Raw spans for one correlation id, bypassing the cache
    pub async fn get_traces(&self, raw_id: &str) -> Result<Vec<SpanRecord>, CorrelationError> {
        let id = self.accept_id(raw_id)?;
        match timeout_at(Instant::now() + self.timeout, self.storage.fetch_spans(&id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CorrelationError::UpstreamTimeout {
                budget_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Raw log records for one correlation id, bypassing the cache
    pub async fn get_logs(&self, raw_id: &str) -> Result<Vec<LogRecord>, CorrelationError> {
        let id = self.accept_id(raw_id)?;
        match timeout_at(Instant::now() + self.timeout, self.storage.fetch_logs(&id)).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(CorrelationError::UpstreamTimeout {
                budget_ms: self.timeout.as_millis() as u64,
            }),
        }
    }

    /// Drop a cached context, e.g. after late-arriving records
    pub fn invalidate(&self, raw_id: &str) -> bool {
        match self.accept_id(raw_id) {
            Ok(id) => self.cache.invalidate(&id.identity_key(&self.id_prefix)),
            Err(_) => false,
        }
    }
}
