//! Enrichment stage
//!
//! Batch transform that stamps every record with a correlation id, links
//! metric points to the span they were recorded under, and bounds attribute
//! cardinality. Enrichment is best effort: every record that comes in goes
//! out, enriched or not.

use crate::authority::{IdAuthority, Provenance, Resolution, ResolveOutcome};
use crate::cardinality::{CardinalityGuard, OVERFLOW_VALUE};
use crate::clock::{Clock, SystemClock};
use crate::normalize::{normalize_method, normalize_url_path, URL_ATTRIBUTES};
use olly_core::config::{CardinalitySettings, CorrelationSettings};
use olly_core::metrics::SharedMetrics;
use olly_core::plugins::{BatchProcessor, PluginInfo};
use olly_core::telemetry::{Exemplar, TelemetryRecord};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Correlation enrichment processor
pub struct EnrichmentStage {
    authority: IdAuthority,
    guard: Option<Arc<CardinalityGuard>>,
    cardinality: CardinalitySettings,
    metrics: SharedMetrics,
}

impl EnrichmentStage {
    pub fn new(
        correlation: CorrelationSettings,
        cardinality: CardinalitySettings,
        metrics: SharedMetrics,
    ) -> Self {
        Self::with_clock(correlation, cardinality, metrics, Arc::new(SystemClock))
    }

    pub fn with_clock(
        correlation: CorrelationSettings,
        cardinality: CardinalitySettings,
        metrics: SharedMetrics,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let guard = cardinality
            .enabled
            .then(|| Arc::new(CardinalityGuard::from_settings(&cardinality, clock.clone())));

        Self {
            authority: IdAuthority::with_clock(correlation, clock),
            guard,
            cardinality,
            metrics,
        }
    }

    /// Shared guard, for the background sweeper and stats
    pub fn guard(&self) -> Option<Arc<CardinalityGuard>> {
        self.guard.clone()
    }

    pub fn authority(&self) -> &IdAuthority {
        &self.authority
    }

    /// Enrich one record in place
    pub fn enrich(&self, record: &mut TelemetryRecord) {
        self.metrics.enrichment.records_processed.fetch_add(1, Ordering::Relaxed);

        self.drop_attributes(record);
        if self.cardinality.normalize_urls {
            self.normalize_attributes(record);
        }
        if let Some(guard) = &self.guard {
            self.apply_guard(guard, record);
        }

        match self.authority.resolve(record) {
            ResolveOutcome::Resolved(resolution) => self.apply_resolution(record, resolution),
            ResolveOutcome::Rejected(e) => {
                self.metrics.enrichment.ids_rejected.fetch_add(1, Ordering::Relaxed);
                debug!("Record from {} passed through without id: {}", record.service(), e);
            }
            ResolveOutcome::Unresolved => {
                debug!("No correlation id for {:?} from {}", record.kind(), record.service());
            }
        }
    }

    fn apply_resolution(&self, record: &mut TelemetryRecord, resolution: Resolution) {
        let counters = &self.metrics.enrichment;
        match resolution.provenance {
            Provenance::Existing => counters.ids_existing.fetch_add(1, Ordering::Relaxed),
            Provenance::Baggage | Provenance::Header | Provenance::Body => {
                counters.ids_extracted.fetch_add(1, Ordering::Relaxed)
            }
            Provenance::Derived => counters.ids_derived.fetch_add(1, Ordering::Relaxed),
            Provenance::Generated => counters.ids_generated.fetch_add(1, Ordering::Relaxed),
        };
        if resolution.sanitized {
            counters.ids_sanitized.fetch_add(1, Ordering::Relaxed);
        }

        let name = self.authority.settings().attribute_name.clone();
        let id = resolution.id.as_str();

        if resolution.provenance != Provenance::Existing {
            record.attributes_mut().insert(name.clone(), id.to_string());
        }
        if self.authority.settings().propagate_to_resource {
            record.resource_mut().insert(name.clone(), id.to_string());
        }

        if let TelemetryRecord::Metric(point) = record {
            if point.has_active_span() {
                let trace_id = point.trace_id.clone().unwrap_or_default();
                let span_id = point.span_id.clone().unwrap_or_default();
                let exemplar = point
                    .exemplar
                    .get_or_insert_with(|| Exemplar::new(trace_id, span_id));
                if !exemplar.filtered_attributes.contains_key(&name) {
                    exemplar.filtered_attributes.insert(name, id.to_string());
                    counters.exemplars_linked.fetch_add(1, Ordering::Relaxed);
                }
            } else if let Some(exemplar) = point.exemplar.as_mut() {
                exemplar.filtered_attributes.entry(name).or_insert_with(|| id.to_string());
            }
        }
    }

    fn drop_attributes(&self, record: &mut TelemetryRecord) {
        if self.cardinality.drop_attributes.is_empty() {
            return;
        }
        let drop = &self.cardinality.drop_attributes;
        let attrs = record.attributes_mut();
        let before = attrs.len();
        attrs.retain(|key, _| !drop.iter().any(|d| d.eq_ignore_ascii_case(key)));
        let dropped = before - attrs.len();
        if dropped > 0 {
            self.metrics
                .enrichment
                .attributes_dropped
                .fetch_add(dropped as u64, Ordering::Relaxed);
        }
    }

    fn normalize_attributes(&self, record: &mut TelemetryRecord) {
        let attrs = record.attributes_mut();
        if let Some(method) = attrs.get_mut("http.method") {
            *method = normalize_method(method);
        }
        for key in URL_ATTRIBUTES {
            if let Some(value) = attrs.get_mut(*key) {
                *value = normalize_url_path(value);
            }
        }
    }

    fn apply_guard(&self, guard: &CardinalityGuard, record: &mut TelemetryRecord) {
        let service = record.service().to_string();
        let attrs = record.attributes_mut();
        for key in &self.cardinality.bounded_attributes {
            let Some(value) = attrs.get_mut(key) else {
                continue;
            };
            if value.as_str() == OVERFLOW_VALUE || guard.allow(key, value) {
                continue;
            }
            warn!(
                "Cardinality limit reached for {} on {}; value replaced",
                key, service
            );
            *value = OVERFLOW_VALUE.to_string();
            self.metrics.record_rejection(key);
        }
    }
}

impl PluginInfo for EnrichmentStage {
    fn name(&self) -> &str {
        "correlation-enricher"
    }

    fn version(&self) -> &str {
        env!("CARGO_PKG_VERSION")
    }

    fn description(&self) -> &str {
        "Stamps records with correlation ids and bounds attribute cardinality"
    }
}

impl BatchProcessor for EnrichmentStage {
    fn process(&self, mut batch: Vec<TelemetryRecord>) -> Vec<TelemetryRecord> {
        for record in &mut batch {
            self.enrich(record);
        }
        batch
    }
}
