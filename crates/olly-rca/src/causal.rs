//! Backdoor-adjusted causal effect estimation
//!
//! The context window is cut into equal buckets. Each bucket with at least
//! one outcome event (span end or log) is an observation whose outcome is the
//! error rate of those events. A (service, metric) series is the treatment:
//! active in a bucket when the series has an anomalous point there or in the
//! previous bucket. Callers of the treated service form the adjustment set,
//! and the effect is the stratified difference of mean error rates.

use crate::graph::ServiceGraph;
use crate::model::CausalCandidate;
use chrono::{DateTime, Utc};
use olly_core::anomaly::AnomalyConfig;
use olly_core::context::{CorrelatedContext, TimeRange};
use statrs::statistics::Statistics;
use std::collections::{BTreeMap, HashMap};

/// Equal-width time buckets over a context window
#[derive(Debug, Clone, Copy)]
pub struct Buckets {
    start: DateTime<Utc>,
    width_ms: f64,
    count: usize,
}

impl Buckets {
    pub fn new(range: &TimeRange, count: usize) -> Self {
        let count = count.max(1);
        let width_ms = (range.duration_ms() / count as f64).max(f64::EPSILON);
        Self {
            start: range.start,
            width_ms,
            count,
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Bucket index of `ts`, clamped to the window
    pub fn index(&self, ts: DateTime<Utc>) -> usize {
        let offset_ms = (ts - self.start).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0;
        if offset_ms <= 0.0 {
            return 0;
        }
        ((offset_ms / self.width_ms) as usize).min(self.count - 1)
    }
}

/// Result of estimating every treatment in a context
#[derive(Debug, Clone)]
pub struct CausalEstimate {
    /// Candidates with a positive effect, highest confidence first
    pub candidates: Vec<CausalCandidate>,

    /// Mean error rate over observed buckets
    pub observed_error_rate: f64,

    /// Buckets holding at least one outcome event
    pub observed_buckets: usize,
}

impl CausalEstimate {
    /// Error rate expected had `candidate`'s treatment never been active
    pub fn counterfactual_rate(&self, candidate: &CausalCandidate) -> f64 {
        if self.observed_buckets == 0 {
            return self.observed_error_rate;
        }
        let treated_fraction = candidate.treated_buckets as f64 / self.observed_buckets as f64;
        (self.observed_error_rate - candidate.effect * treated_fraction).clamp(0.0, 1.0)
    }
}

/// Error rate per bucket; `None` for buckets without outcome events
pub fn bucket_outcomes(ctx: &CorrelatedContext, buckets: &Buckets) -> Vec<Option<f64>> {
    let mut totals = vec![(0usize, 0usize); buckets.count()];

    for span in &ctx.spans {
        let slot = &mut totals[buckets.index(span.end_time())];
        slot.0 += 1;
        slot.1 += span.is_error() as usize;
    }
    for log in &ctx.logs {
        let slot = &mut totals[buckets.index(log.timestamp)];
        slot.0 += 1;
        slot.1 += log.is_error() as usize;
    }

    totals
        .into_iter()
        .map(|(total, errors)| (total > 0).then(|| errors as f64 / total as f64))
        .collect()
}

/// Treatment indicator per bucket for every (service, metric) series
pub fn treatments(
    ctx: &CorrelatedContext,
    buckets: &Buckets,
    anomaly: &AnomalyConfig,
) -> BTreeMap<(String, String), Vec<bool>> {
    let flags = anomaly.detect(&ctx.metrics);
    let mut series: BTreeMap<(String, String), Vec<bool>> = BTreeMap::new();

    for (point, anomalous) in ctx.metrics.iter().zip(flags) {
        let active = series
            .entry((point.service.clone(), point.name.clone()))
            .or_insert_with(|| vec![false; buckets.count()]);
        if anomalous {
            let idx = buckets.index(point.timestamp);
            active[idx] = true;
            if idx + 1 < active.len() {
                active[idx + 1] = true;
            }
        }
    }

    series
}

/// Stratified difference of mean outcomes between treated and control buckets
///
/// Strata with an empty arm are skipped and the remaining weights
/// renormalized. `None` when no stratum has both arms.
pub fn backdoor_effect(outcomes: &[Option<f64>], treated: &[bool], strata: &[Vec<bool>]) -> Option<f64> {
    let mut groups: HashMap<&[bool], (Vec<f64>, Vec<f64>)> = HashMap::new();

    for (idx, outcome) in outcomes.iter().enumerate() {
        let Some(y) = outcome else { continue };
        let (treated_arm, control_arm) = groups.entry(strata[idx].as_slice()).or_default();
        if treated[idx] {
            treated_arm.push(*y);
        } else {
            control_arm.push(*y);
        }
    }

    let mut weighted = 0.0;
    let mut total_weight = 0.0;
    for (treated_arm, control_arm) in groups.values() {
        if treated_arm.is_empty() || control_arm.is_empty() {
            continue;
        }
        let weight = (treated_arm.len() + control_arm.len()) as f64;
        weighted += weight * (treated_arm.as_slice().mean() - control_arm.as_slice().mean());
        total_weight += weight;
    }

    (total_weight > 0.0).then(|| weighted / total_weight)
}

/// Estimate the effect of every metric treatment on the error-rate outcome
pub fn estimate(
    ctx: &CorrelatedContext,
    graph: &ServiceGraph,
    buckets: &Buckets,
    anomaly: &AnomalyConfig,
) -> CausalEstimate {
    let outcomes = bucket_outcomes(ctx, buckets);
    let observed: Vec<f64> = outcomes.iter().flatten().copied().collect();
    let observed_error_rate = if observed.is_empty() { 0.0 } else { observed.as_slice().mean() };

    let series = treatments(ctx, buckets, anomaly);
    let mut candidates = Vec::new();

    for ((service, metric), treated) in &series {
        let treated_buckets = outcomes
            .iter()
            .zip(treated)
            .filter(|(y, t)| y.is_some() && **t)
            .count();
        if treated_buckets == 0 {
            continue;
        }

        // Adjustment set: every series owned by a direct caller
        let callers = graph.callers(service);
        let strata: Vec<Vec<bool>> = (0..buckets.count())
            .map(|b| {
                series
                    .iter()
                    .filter(|((s, _), _)| callers.contains(&s.as_str()))
                    .map(|(_, active)| active[b])
                    .collect()
            })
            .collect();

        let Some(effect) = backdoor_effect(&outcomes, treated, &strata) else {
            continue;
        };
        let effect = effect.clamp(0.0, 1.0);
        if effect <= 0.0 {
            continue;
        }

        candidates.push(CausalCandidate {
            service: service.clone(),
            metric: metric.clone(),
            effect,
            confidence: effect * (1.0 - (-(treated_buckets as f64)).exp()),
            treated_buckets,
        });
    }

    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    CausalEstimate {
        candidates,
        observed_error_rate,
        observed_buckets: observed.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    #[test]
    fn test_bucket_index() {
        let buckets = Buckets::new(&TimeRange::new(t(0), t(1200)), 12);
        assert_eq!(buckets.index(t(0)), 0);
        assert_eq!(buckets.index(t(99)), 0);
        assert_eq!(buckets.index(t(100)), 1);
        assert_eq!(buckets.index(t(1200)), 11);
        assert_eq!(buckets.index(t(5000)), 11);
        assert_eq!(buckets.index(t(-50)), 0);

        let instant = Buckets::new(&TimeRange::new(t(0), t(0)), 12);
        assert_eq!(instant.index(t(0)), 0);
    }

    #[test]
    fn test_unadjusted_effect() {
        let outcomes = vec![Some(1.0), Some(1.0), None, Some(0.0), Some(0.0)];
        let treated = vec![true, true, true, false, false];
        let strata = vec![Vec::new(); 5];
        assert_eq!(backdoor_effect(&outcomes, &treated, &strata), Some(1.0));
    }

    #[test]
    fn test_confounded_effect_is_adjusted() {
        // The caller's anomaly drives errors; the treatment only co-occurs
        let outcomes = vec![Some(1.0), Some(1.0), Some(0.0), Some(0.0), Some(1.0), Some(0.0)];
        let treated = vec![true, false, true, false, true, false];
        let strata = vec![
            vec![true],
            vec![true],
            vec![false],
            vec![false],
            vec![true],
            vec![false],
        ];
        let effect = backdoor_effect(&outcomes, &treated, &strata).unwrap();
        assert!(effect.abs() < 1e-9);
    }

    #[test]
    fn test_no_overlap_is_none() {
        let outcomes = vec![Some(1.0), Some(0.0)];
        let treated = vec![true, true];
        let strata = vec![Vec::new(); 2];
        assert_eq!(backdoor_effect(&outcomes, &treated, &strata), None);
    }
}
