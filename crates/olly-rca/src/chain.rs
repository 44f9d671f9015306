//! Chain-of-event analysis
//!
//! Every span boundary, log entry and metric anomaly becomes one event. For
//! each ordered pair the causal weight is
//! `temporal(gap) * dependency(services) * affinity(kinds)`, and the
//! heaviest path ending at an incident event is the primary chain.

use crate::graph::ServiceGraph;
use crate::model::{CausalChain, ChainEvent, ChainEventKind};
use chrono::{DateTime, Utc};
use olly_core::anomaly::AnomalyConfig;
use olly_core::config::RcaSettings;
use olly_core::context::CorrelatedContext;

/// Weight parameters for chain analysis
#[derive(Debug, Clone, Copy)]
pub struct ChainParams {
    pub max_lookback_ms: f64,
    pub temporal_decay_ms: f64,
    pub dependency_epsilon: f64,
}

impl From<&RcaSettings> for ChainParams {
    fn from(settings: &RcaSettings) -> Self {
        Self {
            max_lookback_ms: settings.max_lookback_ms as f64,
            temporal_decay_ms: settings.temporal_decay_ms.max(1) as f64,
            dependency_epsilon: settings.dependency_epsilon,
        }
    }
}

/// How strongly an event of kind `from` tends to cause one of kind `to`
pub fn affinity(from: ChainEventKind, to: ChainEventKind) -> f64 {
    use ChainEventKind::*;
    match (from, to) {
        (MetricAnomaly, SpanError) => 0.9,
        (MetricAnomaly, LogError) => 0.8,
        (MetricAnomaly, MetricAnomaly) => 0.5,
        (SpanError, SpanError) => 0.8,
        (SpanError, LogError) => 0.9,
        (SpanError, MetricAnomaly) => 0.3,
        (LogError, SpanError) => 0.7,
        (LogError, LogError) => 0.6,
        (LogError, MetricAnomaly) => 0.3,
        _ => 0.0,
    }
}

/// Flatten a context into one event list, ascending by timestamp
pub fn collect_events(ctx: &CorrelatedContext, anomaly: &AnomalyConfig) -> Vec<ChainEvent> {
    let mut events = Vec::with_capacity(ctx.spans.len() * 2 + ctx.logs.len());

    for span in &ctx.spans {
        events.push(ChainEvent {
            timestamp: span.timestamp,
            service: span.service.clone(),
            kind: ChainEventKind::Other,
            description: format!("{} started", span.name),
        });
        let (kind, description) = if span.is_error() {
            let detail = span.status_message.as_deref().unwrap_or("error status");
            (ChainEventKind::SpanError, format!("{} failed ({})", span.name, detail))
        } else {
            (ChainEventKind::Other, format!("{} finished", span.name))
        };
        events.push(ChainEvent {
            timestamp: span.end_time(),
            service: span.service.clone(),
            kind,
            description,
        });
    }

    for log in &ctx.logs {
        events.push(ChainEvent {
            timestamp: log.timestamp,
            service: log.service.clone(),
            kind: if log.is_error() {
                ChainEventKind::LogError
            } else {
                ChainEventKind::Other
            },
            description: format!("logged \"{}\"", log.body.trim()),
        });
    }

    let flags = anomaly.detect(&ctx.metrics);
    for (point, _) in ctx.metrics.iter().zip(flags).filter(|(_, a)| *a) {
        let description = match point.baseline {
            Some(baseline) => format!("{} rose to {} (baseline {})", point.name, point.value, baseline),
            None => format!("{} reached {}", point.name, point.value),
        };
        events.push(ChainEvent {
            timestamp: point.timestamp,
            service: point.service.clone(),
            kind: ChainEventKind::MetricAnomaly,
            description,
        });
    }

    events.sort_by_key(|e| e.timestamp);
    events
}

fn gap_ms(from: DateTime<Utc>, to: DateTime<Utc>) -> f64 {
    (to - from).num_microseconds().unwrap_or(i64::MAX) as f64 / 1000.0
}

/// Causal weight of `from` preceding `to`
pub fn pair_weight(from: &ChainEvent, to: &ChainEvent, graph: &ServiceGraph, params: &ChainParams) -> f64 {
    let gap = gap_ms(from.timestamp, to.timestamp);
    if gap < 0.0 || gap > params.max_lookback_ms {
        return 0.0;
    }
    let temporal = (-gap / params.temporal_decay_ms).exp();

    let dependency = if from.service == to.service || graph.connected(&from.service, &to.service) {
        1.0
    } else {
        params.dependency_epsilon
    };

    temporal * dependency * affinity(from.kind, to.kind)
}

/// Heaviest weighted path ending at an incident event
///
/// Dynamic programming over the time-ordered list: `best[j]` is the heaviest
/// path ending at `j`. Ties keep the earlier predecessor.
pub fn primary_chain(events: &[ChainEvent], graph: &ServiceGraph, params: &ChainParams) -> CausalChain {
    let n = events.len();
    let mut best = vec![0.0f64; n];
    let mut prev: Vec<Option<usize>> = vec![None; n];

    for j in 0..n {
        if !events[j].kind.is_incident() {
            continue;
        }
        for i in 0..j {
            if !events[i].kind.is_incident() {
                continue;
            }
            let w = pair_weight(&events[i], &events[j], graph, params);
            if w > 0.0 && best[i] + w > best[j] {
                best[j] = best[i] + w;
                prev[j] = Some(i);
            }
        }
    }

    let end = (0..n)
        .filter(|&j| events[j].kind.is_incident() && best[j] > 0.0)
        .fold(None, |acc: Option<usize>, j| match acc {
            Some(a) if best[a] >= best[j] => Some(a),
            _ => Some(j),
        });

    let Some(end) = end else {
        // A lone incident is still a (weightless) chain
        return match events.iter().find(|e| e.kind.is_incident()) {
            Some(event) => {
                let events = vec![event.clone()];
                let interpretation = interpret(&events);
                CausalChain {
                    events,
                    weight: 0.0,
                    strength: 0.0,
                    interpretation,
                }
            }
            None => CausalChain::empty(),
        };
    };

    let mut path = vec![end];
    let mut cursor = end;
    while let Some(p) = prev[cursor] {
        path.push(p);
        cursor = p;
    }
    path.reverse();

    let chain_events: Vec<ChainEvent> = path.iter().map(|&i| events[i].clone()).collect();
    let weight = best[end];
    CausalChain {
        interpretation: interpret(&chain_events),
        events: chain_events,
        weight,
        strength: 1.0 - (-weight).exp(),
    }
}

/// Stepwise explanation of a chain in temporal order
pub fn interpret(events: &[ChainEvent]) -> String {
    let Some(first) = events.first() else {
        return String::new();
    };
    events
        .iter()
        .enumerate()
        .map(|(step, e)| {
            let offset = gap_ms(first.timestamp, e.timestamp);
            format!("{}. [+{:.0}ms] {} {}: {}", step + 1, offset, e.service, e.kind.label(), e.description)
        })
        .collect::<Vec<_>>()
        .join(", then ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t(ms: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap() + Duration::milliseconds(ms)
    }

    fn event(ms: i64, service: &str, kind: ChainEventKind) -> ChainEvent {
        ChainEvent {
            timestamp: t(ms),
            service: service.into(),
            kind,
            description: "x".into(),
        }
    }

    fn params() -> ChainParams {
        ChainParams::from(&RcaSettings::default())
    }

    #[test]
    fn test_affinity_table() {
        use ChainEventKind::*;
        assert_eq!(affinity(MetricAnomaly, SpanError), 0.9);
        assert_eq!(affinity(SpanError, LogError), 0.9);
        assert_eq!(affinity(LogError, LogError), 0.6);
        assert_eq!(affinity(Other, SpanError), 0.0);
        assert_eq!(affinity(SpanError, Other), 0.0);
    }

    #[test]
    fn test_pair_weight_factors() {
        let mut graph = ServiceGraph::default();
        graph.add_edge("orders", "db");
        let p = params();

        let a = event(0, "db", ChainEventKind::MetricAnomaly);
        let linked = event(100, "orders", ChainEventKind::SpanError);
        let unlinked = event(100, "billing", ChainEventKind::SpanError);
        let too_late = event(40_000, "orders", ChainEventKind::SpanError);

        let w = pair_weight(&a, &linked, &graph, &p);
        assert!((w - 0.9 * (-100.0f64 / 5000.0).exp()).abs() < 1e-9);
        let w_unlinked = pair_weight(&a, &unlinked, &graph, &p);
        assert!((w_unlinked - 0.1 * w).abs() < 1e-9);
        assert_eq!(pair_weight(&a, &too_late, &graph, &p), 0.0);
        assert_eq!(pair_weight(&linked, &a, &graph, &p), 0.0);
    }

    #[test]
    fn test_primary_chain_follows_dependencies() {
        let mut graph = ServiceGraph::default();
        graph.add_edge("gateway", "orders");
        graph.add_edge("orders", "db");

        let events = vec![
            event(0, "gateway", ChainEventKind::Other),
            event(200, "db", ChainEventKind::MetricAnomaly),
            event(310, "db", ChainEventKind::SpanError),
            event(355, "orders", ChainEventKind::SpanError),
            event(400, "gateway", ChainEventKind::SpanError),
        ];
        let chain = primary_chain(&events, &graph, &params());

        assert_eq!(chain.events.len(), 4);
        assert_eq!(chain.origin_service(), Some("db"));
        assert_eq!(chain.events.last().unwrap().service, "gateway");
        assert!(chain.strength > 0.8 && chain.strength < 1.0);
        assert!(chain.interpretation.starts_with("1. [+0ms] db metric anomaly"));
        assert!(chain.interpretation.contains("4. [+200ms] gateway span error"));
    }

    #[test]
    fn test_no_incidents_is_empty() {
        let graph = ServiceGraph::default();
        let events = vec![event(0, "a", ChainEventKind::Other), event(5, "a", ChainEventKind::Other)];
        assert!(primary_chain(&events, &graph, &params()).is_empty());

        let single = vec![event(0, "a", ChainEventKind::SpanError)];
        let chain = primary_chain(&single, &graph, &params());
        assert_eq!(chain.events.len(), 1);
        assert_eq!(chain.strength, 0.0);
    }
}
