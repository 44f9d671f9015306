//! Root-cause analyzer
//!
//! Runs causal-effect estimation and chain-of-event analysis over one
//! context and merges them into a per-service score:
//!
//! `score = causal_weight * candidate confidence
//!        + chain_weight * chain strength (when the chain starts there)`
//!
//! The best score at or above the confidence threshold wins; otherwise the
//! outcome is inconclusive. The narrator only ever sees a finished result.

use crate::causal::{estimate, Buckets, CausalEstimate};
use crate::chain::{collect_events, primary_chain, ChainParams};
use crate::graph::ServiceGraph;
use crate::model::{CausalCandidate, CausalChain, RcaOutcome, RcaResult};
use crate::narrator::Narrator;
use olly_core::anomaly::AnomalyConfig;
use olly_core::config::RcaSettings;
use olly_core::context::CorrelatedContext;
use olly_core::metrics::SharedMetrics;
use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stateless analyzer; every call works on one context
#[derive(Debug, Clone)]
pub struct RootCauseAnalyzer {
    settings: RcaSettings,
    anomaly: AnomalyConfig,
}

impl RootCauseAnalyzer {
    pub fn new(settings: RcaSettings, anomaly: AnomalyConfig) -> Self {
        Self { settings, anomaly }
    }

    pub fn settings(&self) -> &RcaSettings {
        &self.settings
    }

    pub fn analyze(&self, ctx: &CorrelatedContext) -> RcaOutcome {
        let graph = ServiceGraph::from_context(ctx);
        if graph.is_empty() {
            return inconclusive("context has no services", None, 0.0);
        }

        let buckets = Buckets::new(&ctx.time_range, self.settings.bucket_count);
        let causal = estimate(ctx, &graph, &buckets, &self.anomaly);

        let events = collect_events(ctx, &self.anomaly);
        let chain = primary_chain(&events, &graph, &ChainParams::from(&self.settings));

        if causal.candidates.is_empty() && chain.is_empty() {
            return inconclusive("no metric anomalies and no error events", None, 0.0);
        }

        let scores = self.score(&causal.candidates, &chain);
        let best = scores
            .iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(service, score)| (service.clone(), *score));

        let Some((service, score)) = best else {
            return inconclusive("no candidate services", None, 0.0);
        };

        debug!(
            "RCA for {}: best {} at {:.3} ({} candidates, chain of {})",
            ctx.correlation_id,
            service,
            score,
            causal.candidates.len(),
            chain.events.len()
        );

        if score < self.settings.confidence_threshold {
            return inconclusive(
                &format!(
                    "best confidence {:.2} is below threshold {:.2}",
                    score, self.settings.confidence_threshold
                ),
                Some(service),
                score,
            );
        }

        let top_candidate = causal.candidates.iter().find(|c| c.service == service);
        let counterfactual = top_candidate.map(|c| counterfactual(&causal, c));

        RcaOutcome::Conclusive {
            result: RcaResult {
                correlation_id: ctx.correlation_id.clone(),
                root_cause_metric: top_candidate.map(|c| c.metric.clone()),
                root_cause_service: service,
                confidence: score.min(1.0),
                causal_chain: chain,
                counterfactual,
                candidates: causal.candidates,
                narrative: None,
            },
        }
    }

    /// Merge both analyses into one score per service
    fn score(&self, candidates: &[CausalCandidate], chain: &CausalChain) -> BTreeMap<String, f64> {
        let mut scores: BTreeMap<String, f64> = BTreeMap::new();

        // Candidates are sorted, so the first per service is its strongest
        for candidate in candidates {
            scores
                .entry(candidate.service.clone())
                .or_insert(self.settings.causal_weight * candidate.confidence);
        }

        if let Some(origin) = chain.origin_service() {
            *scores.entry(origin.to_string()).or_insert(0.0) += self.settings.chain_weight * chain.strength;
        }

        scores
    }
}

fn inconclusive(reason: &str, best_candidate: Option<String>, best_confidence: f64) -> RcaOutcome {
    RcaOutcome::Inconclusive {
        reason: reason.to_string(),
        best_candidate,
        best_confidence,
    }
}

fn counterfactual(causal: &CausalEstimate, candidate: &CausalCandidate) -> String {
    format!(
        "If {}'s {} had stayed within its normal baseline, the error rate would be approximately {:.1}% (observed {:.1}%)",
        candidate.service,
        candidate.metric,
        causal.counterfactual_rate(candidate) * 100.0,
        causal.observed_error_rate * 100.0
    )
}

/// Analyzer plus optional narrator, with self-metrics
pub struct RcaService {
    analyzer: RootCauseAnalyzer,
    narrator: Option<Arc<dyn Narrator>>,
    narrator_timeout: Duration,
    metrics: SharedMetrics,
}

impl RcaService {
    pub fn new(analyzer: RootCauseAnalyzer, metrics: SharedMetrics) -> Self {
        Self {
            analyzer,
            narrator: None,
            narrator_timeout: Duration::from_secs(3),
            metrics,
        }
    }

    pub fn with_narrator(mut self, narrator: Arc<dyn Narrator>, timeout: Duration) -> Self {
        self.narrator = Some(narrator);
        self.narrator_timeout = timeout;
        self
    }

    pub fn analyzer(&self) -> &RootCauseAnalyzer {
        &self.analyzer
    }

    /// Analyze, then ask the narrator for prose under its own timeout
    ///
    /// A narrator failure only omits `narrative`; the result is returned
    /// either way.
    pub async fn run(&self, ctx: &CorrelatedContext) -> RcaOutcome {
        self.metrics.analysis.runs.fetch_add(1, Ordering::Relaxed);
        let mut outcome = self.analyzer.analyze(ctx);

        match &mut outcome {
            RcaOutcome::Conclusive { result } => {
                self.metrics.analysis.conclusive.fetch_add(1, Ordering::Relaxed);
                info!(
                    "Root cause for {}: {} ({:.0}%)",
                    result.correlation_id,
                    result.root_cause_service,
                    result.confidence * 100.0
                );
                if let Some(narrator) = &self.narrator {
                    let narrative = self.narrate(narrator.as_ref(), result).await;
                    result.narrative = narrative;
                }
            }
            RcaOutcome::Inconclusive { reason, .. } => {
                self.metrics.analysis.inconclusive.fetch_add(1, Ordering::Relaxed);
                info!("Inconclusive analysis for {}: {}", ctx.correlation_id, reason);
            }
        }

        outcome
    }

    async fn narrate(&self, narrator: &dyn Narrator, result: &RcaResult) -> Option<String> {
        match tokio::time::timeout(self.narrator_timeout, narrator.explain(result)).await {
            Ok(Ok(text)) => {
                self.metrics.analysis.narrator_success.fetch_add(1, Ordering::Relaxed);
                Some(text)
            }
            Ok(Err(e)) => {
                self.metrics.analysis.narrator_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Narrator {} failed: {}", narrator.name(), e);
                None
            }
            Err(_) => {
                self.metrics.analysis.narrator_failures.fetch_add(1, Ordering::Relaxed);
                warn!("Narrator {} timed out after {:?}", narrator.name(), self.narrator_timeout);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::narrator::{NarratorError, StaticNarrator};
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
    use olly_core::metrics::create_metrics;
    use olly_core::telemetry::{LogRecord, MetricPoint, Severity, SpanRecord, SpanStatus};
    use olly_correlate::build_context;

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + ChronoDuration::milliseconds(ms)
    }

    fn span(service: &str, id: &str, parent: Option<&str>, start: i64, dur: f64, error: bool) -> SpanRecord {
        let mut s = SpanRecord::new(service, format!("{} call", service), t(start));
        s.trace_id = Some("trace-1".into());
        s.span_id = Some(id.into());
        s.parent_span_id = parent.map(String::from);
        s.duration_ms = dur;
        s.status = if error { SpanStatus::Error } else { SpanStatus::Ok };
        s
    }

    fn pool_wait(ms: i64, value: f64) -> MetricPoint {
        let mut p = MetricPoint::new("db", "db.pool.wait_ms", value, t(ms));
        p.baseline = Some(5.0);
        p
    }

    /// db pool saturates at t=200, then db, orders and gateway fail in turn
    fn incident_context() -> CorrelatedContext {
        let spans = vec![
            span("gateway", "g1", None, 0, 400.0, true),
            span("orders", "o1", Some("g1"), 205, 150.0, true),
            span("db", "d1", Some("o1"), 210, 100.0, true),
            span("gateway", "g2", None, 1000, 50.0, false),
            span("orders", "o2", Some("g2"), 1100, 20.0, false),
        ];
        let logs = vec![
            LogRecord::new("orders", Severity::Error, "could not reserve stock", t(330)),
            LogRecord::new("orders", Severity::Info, "recovered", t(1500)),
        ];
        let metrics = (0..=10)
            .map(|i| {
                let ms = i * 200;
                pool_wait(ms, if ms == 200 { 500.0 } else { 5.0 })
            })
            .collect();
        build_context("olly-k1-0badf00d", spans, logs, metrics, &AnomalyConfig::default())
    }

    fn clean_context() -> CorrelatedContext {
        let spans = vec![
            span("gateway", "g1", None, 0, 40.0, false),
            span("orders", "o1", Some("g1"), 5, 20.0, false),
        ];
        let logs = vec![LogRecord::new("orders", Severity::Info, "reserved", t(20))];
        let metrics = (0..=5).map(|i| pool_wait(i * 10, 5.0)).collect();
        build_context("olly-k2-0badf00d", spans, logs, metrics, &AnomalyConfig::default())
    }

    fn analyzer() -> RootCauseAnalyzer {
        RootCauseAnalyzer::new(RcaSettings::default(), AnomalyConfig::default())
    }

    #[test]
    fn test_injected_anomaly_selected() {
        let outcome = analyzer().analyze(&incident_context());
        let result = outcome.result().expect("analysis should be conclusive");

        assert_eq!(result.root_cause_service, "db");
        assert_eq!(result.root_cause_metric.as_deref(), Some("db.pool.wait_ms"));
        assert!(result.confidence >= RcaSettings::default().confidence_threshold);
        assert_eq!(result.causal_chain.origin_service(), Some("db"));
        assert!(result.causal_chain.events.len() >= 3);
        assert!(result
            .counterfactual
            .as_deref()
            .unwrap()
            .starts_with("If db's db.pool.wait_ms had stayed within its normal baseline"));
        assert!(result.narrative.is_none());
    }

    #[test]
    fn test_clean_context_inconclusive() {
        let outcome = analyzer().analyze(&clean_context());
        assert!(!outcome.is_conclusive());
    }

    #[test]
    fn test_errors_without_cause_stay_below_threshold() {
        // Error chain but no metric anomaly: the chain alone cannot reach 0.5
        let spans = vec![
            span("gateway", "g1", None, 0, 100.0, true),
            span("orders", "o1", Some("g1"), 10, 50.0, true),
        ];
        let ctx = build_context("flow", spans, Vec::new(), Vec::new(), &AnomalyConfig::default());
        match analyzer().analyze(&ctx) {
            RcaOutcome::Inconclusive {
                best_candidate,
                best_confidence,
                ..
            } => {
                assert_eq!(best_candidate.as_deref(), Some("orders"));
                assert!(best_confidence > 0.0 && best_confidence < 0.5);
            }
            other => panic!("expected inconclusive, got {:?}", other),
        }
    }

    struct SlowNarrator;

    #[async_trait]
    impl Narrator for SlowNarrator {
        fn name(&self) -> &str {
            "slow"
        }

        async fn explain(&self, _result: &RcaResult) -> Result<String, NarratorError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok("too late".into())
        }
    }

    struct BrokenNarrator;

    #[async_trait]
    impl Narrator for BrokenNarrator {
        fn name(&self) -> &str {
            "broken"
        }

        async fn explain(&self, _result: &RcaResult) -> Result<String, NarratorError> {
            Err(NarratorError::EmptyResponse)
        }
    }

    #[tokio::test]
    async fn test_narrator_adds_prose() {
        let metrics = create_metrics();
        let service = RcaService::new(analyzer(), metrics.clone())
            .with_narrator(Arc::new(StaticNarrator::new("Pool saturation in db.")), Duration::from_secs(1));

        let outcome = service.run(&incident_context()).await;
        assert_eq!(outcome.result().unwrap().narrative.as_deref(), Some("Pool saturation in db."));
        assert_eq!(metrics.analysis.narrator_success.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.analysis.conclusive.load(Ordering::Relaxed), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_narrator_timeout_keeps_result() {
        let metrics = create_metrics();
        let service = RcaService::new(analyzer(), metrics.clone())
            .with_narrator(Arc::new(SlowNarrator), Duration::from_millis(3000));

        let plain = analyzer().analyze(&incident_context());
        let outcome = service.run(&incident_context()).await;
        assert_eq!(outcome, plain);
        assert_eq!(metrics.analysis.narrator_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_narrator_error_keeps_result() {
        let metrics = create_metrics();
        let service =
            RcaService::new(analyzer(), metrics.clone()).with_narrator(Arc::new(BrokenNarrator), Duration::from_secs(1));

        let outcome = service.run(&incident_context()).await;
        assert!(outcome.is_conclusive());
        assert!(outcome.result().unwrap().narrative.is_none());
        assert_eq!(metrics.analysis.narrator_failures.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_inconclusive_skips_narrator() {
        let metrics = create_metrics();
        let service = RcaService::new(analyzer(), metrics.clone())
            .with_narrator(Arc::new(StaticNarrator::new("unused")), Duration::from_secs(1));

        let outcome = service.run(&clean_context()).await;
        assert!(!outcome.is_conclusive());
        assert_eq!(metrics.analysis.inconclusive.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.analysis.narrator_success.load(Ordering::Relaxed), 0);
    }
}
