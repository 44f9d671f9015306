//! Self-metrics for the correlation engine
//!
//! Counters for enrichment, context queries and root-cause analysis, exported
//! as Prometheus text or JSON.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Global metrics collector
#[derive(Debug)]
pub struct MetricsCollector {
    /// When the collector was started
    start_time: Instant,
    pub enrichment: EnrichmentMetrics,
    pub query: QueryMetrics,
    pub analysis: AnalysisMetrics,
    /// Guard rejections per attribute name
    pub attribute_rejections: parking_lot::RwLock<HashMap<String, u64>>,
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            enrichment: EnrichmentMetrics::default(),
            query: QueryMetrics::default(),
            analysis: AnalysisMetrics::default(),
            attribute_rejections: parking_lot::RwLock::new(HashMap::new()),
        }
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Count a guard rejection for one attribute
    pub fn record_rejection(&self, attribute: &str) {
        self.enrichment.guard_rejections.fetch_add(1, Ordering::Relaxed);
        *self
            .attribute_rejections
            .write()
            .entry(attribute.to_string())
            .or_insert(0) += 1;
    }

    /// Export metrics in Prometheus format
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        gauge(&mut output, "olly_uptime_seconds", "Time since the engine started", self.uptime_seconds());

        let e = &self.enrichment;
        counter(&mut output, "olly_enrich_records_total", "Records processed by the enrichment stage", load(&e.records_processed));

        output.push_str("# HELP olly_enrich_ids_total Correlation ids resolved by source\n");
        output.push_str("# TYPE olly_enrich_ids_total counter\n");
        for (source, value) in [
            ("existing", &e.ids_existing),
            ("extracted", &e.ids_extracted),
            ("derived", &e.ids_derived),
            ("generated", &e.ids_generated),
        ] {
            let _ = writeln!(output, "olly_enrich_ids_total{{source=\"{}\"}} {}", source, load(value));
        }
        output.push('\n');

        counter(&mut output, "olly_enrich_ids_sanitized_total", "External ids that required sanitization", load(&e.ids_sanitized));
        counter(&mut output, "olly_enrich_ids_rejected_total", "Malformed ids discarded", load(&e.ids_rejected));
        counter(&mut output, "olly_enrich_exemplars_total", "Metric exemplars linked to spans", load(&e.exemplars_linked));
        counter(&mut output, "olly_enrich_attributes_dropped_total", "Attributes removed by drop list", load(&e.attributes_dropped));

        output.push_str("# HELP olly_guard_rejections_total Attribute values rejected by the cardinality guard\n");
        output.push_str("# TYPE olly_guard_rejections_total counter\n");
        let rejections = self.attribute_rejections.read();
        let mut names: Vec<_> = rejections.keys().collect();
        names.sort();
        for name in names {
            let _ = writeln!(output, "olly_guard_rejections_total{{attribute=\"{}\"}} {}", name, rejections[name]);
        }
        output.push('\n');

        let q = &self.query;
        counter(&mut output, "olly_query_requests_total", "Context requests", load(&q.requests));
        output.push_str("# HELP olly_query_cache_total Context cache lookups\n");
        output.push_str("# TYPE olly_query_cache_total counter\n");
        let _ = writeln!(output, "olly_query_cache_total{{result=\"hit\"}} {}", load(&q.cache_hits));
        let _ = writeln!(output, "olly_query_cache_total{{result=\"miss\"}} {}\n", load(&q.cache_misses));
        counter(&mut output, "olly_query_not_found_total", "Requests for unknown ids", load(&q.not_found));
        counter(&mut output, "olly_query_partial_total", "Contexts returned with degraded sub-queries", load(&q.partial));
        counter(&mut output, "olly_query_timeouts_total", "Trace fetches that exceeded the budget", load(&q.timeouts));
        counter(&mut output, "olly_query_storage_errors_total", "Fatal storage failures", load(&q.storage_errors));
        counter(&mut output, "olly_query_validation_errors_total", "Requests with unusable ids", load(&q.validation_errors));

        let a = &self.analysis;
        output.push_str("# HELP olly_rca_runs_total Root-cause analyses by outcome\n");
        output.push_str("# TYPE olly_rca_runs_total counter\n");
        let _ = writeln!(output, "olly_rca_runs_total{{outcome=\"conclusive\"}} {}", load(&a.conclusive));
        let _ = writeln!(output, "olly_rca_runs_total{{outcome=\"inconclusive\"}} {}\n", load(&a.inconclusive));
        output.push_str("# HELP olly_narrator_calls_total Narrator calls by result\n");
        output.push_str("# TYPE olly_narrator_calls_total counter\n");
        let _ = writeln!(output, "olly_narrator_calls_total{{result=\"ok\"}} {}", load(&a.narrator_success));
        let _ = writeln!(output, "olly_narrator_calls_total{{result=\"failed\"}} {}\n", load(&a.narrator_failures));

        output
    }

    /// Export metrics as JSON
    pub fn to_json(&self) -> serde_json::Value {
        let e = &self.enrichment;
        let q = &self.query;
        let a = &self.analysis;
        let rejections = self.attribute_rejections.read().clone();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "enrichment": {
                "records_processed": load(&e.records_processed),
                "ids_existing": load(&e.ids_existing),
                "ids_extracted": load(&e.ids_extracted),
                "ids_derived": load(&e.ids_derived),
                "ids_generated": load(&e.ids_generated),
                "ids_sanitized": load(&e.ids_sanitized),
                "ids_rejected": load(&e.ids_rejected),
                "exemplars_linked": load(&e.exemplars_linked),
                "attributes_dropped": load(&e.attributes_dropped),
                "guard_rejections": load(&e.guard_rejections),
                "rejections_by_attribute": rejections,
            },
            "query": {
                "requests": load(&q.requests),
                "cache_hits": load(&q.cache_hits),
                "cache_misses": load(&q.cache_misses),
                "not_found": load(&q.not_found),
                "partial": load(&q.partial),
                "timeouts": load(&q.timeouts),
                "storage_errors": load(&q.storage_errors),
                "validation_errors": load(&q.validation_errors),
            },
            "analysis": {
                "runs": load(&a.runs),
                "conclusive": load(&a.conclusive),
                "inconclusive": load(&a.inconclusive),
                "narrator_success": load(&a.narrator_success),
                "narrator_failures": load(&a.narrator_failures),
            },
        })
    }
}

/// Enrichment stage counters
#[derive(Debug, Default)]
pub struct EnrichmentMetrics {
    pub records_processed: AtomicU64,
    /// Records that already carried a valid id
    pub ids_existing: AtomicU64,
    /// Ids taken from baggage, headers or log bodies
    pub ids_extracted: AtomicU64,
    pub ids_derived: AtomicU64,
    pub ids_generated: AtomicU64,
    pub ids_sanitized: AtomicU64,
    pub ids_rejected: AtomicU64,
    pub exemplars_linked: AtomicU64,
    pub attributes_dropped: AtomicU64,
    pub guard_rejections: AtomicU64,
}

/// Query engine counters
#[derive(Debug, Default)]
pub struct QueryMetrics {
    pub requests: AtomicU64,
    pub cache_hits: AtomicU64,
    pub cache_misses: AtomicU64,
    pub not_found: AtomicU64,
    pub partial: AtomicU64,
    pub timeouts: AtomicU64,
    pub storage_errors: AtomicU64,
    pub validation_errors: AtomicU64,
}

/// Root-cause analysis counters
#[derive(Debug, Default)]
pub struct AnalysisMetrics {
    pub runs: AtomicU64,
    pub conclusive: AtomicU64,
    pub inconclusive: AtomicU64,
    pub narrator_success: AtomicU64,
    pub narrator_failures: AtomicU64,
}

fn load(value: &AtomicU64) -> u64 {
    value.load(Ordering::Relaxed)
}

fn counter(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = write!(output, "# HELP {name} {help}\n# TYPE {name} counter\n{name} {value}\n\n");
}

fn gauge(output: &mut String, name: &str, help: &str, value: u64) {
    let _ = write!(output, "# HELP {name} {help}\n# TYPE {name} gauge\n{name} {value}\n\n");
}

/// Shared metrics instance
pub type SharedMetrics = Arc<MetricsCollector>;

/// Create a new shared metrics collector
pub fn create_metrics() -> SharedMetrics {
    Arc::new(MetricsCollector::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsCollector::new();
        metrics.enrichment.records_processed.fetch_add(3, Ordering::Relaxed);
        metrics.enrichment.ids_derived.fetch_add(2, Ordering::Relaxed);
        metrics.query.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics.record_rejection("http.route");
        metrics.record_rejection("http.route");

        let text = metrics.to_prometheus();
        assert!(text.contains("olly_enrich_records_total 3"));
        assert!(text.contains("olly_enrich_ids_total{source=\"derived\"} 2"));
        assert!(text.contains("olly_query_cache_total{result=\"hit\"} 1"));
        assert!(text.contains("olly_guard_rejections_total{attribute=\"http.route\"} 2"));
        assert!(text.contains("# TYPE olly_uptime_seconds gauge"));
    }

    #[test]
    fn test_json_export() {
        let metrics = create_metrics();
        metrics.analysis.conclusive.fetch_add(1, Ordering::Relaxed);
        metrics.record_rejection("user.id");

        let json = metrics.to_json();
        assert_eq!(json["analysis"]["conclusive"], 1);
        assert_eq!(json["enrichment"]["guard_rejections"], 1);
        assert_eq!(json["enrichment"]["rejections_by_attribute"]["user.id"], 1);
    }
}
