//! Root-cause analysis result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of event considered by chain analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainEventKind {
    MetricAnomaly,
    SpanError,
    LogError,
    /// Span boundaries and logs without errors
    Other,
}

impl ChainEventKind {
    /// Whether a chain may end at this event
    pub fn is_incident(&self) -> bool {
        !matches!(self, ChainEventKind::Other)
    }

    pub fn label(&self) -> &'static str {
        match self {
            ChainEventKind::MetricAnomaly => "metric anomaly",
            ChainEventKind::SpanError => "span error",
            ChainEventKind::LogError => "error log",
            ChainEventKind::Other => "event",
        }
    }
}

/// One event on a causal chain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainEvent {
    pub timestamp: DateTime<Utc>,
    pub service: String,
    pub kind: ChainEventKind,
    pub description: String,
}

/// Ordered, weighted sequence of events leading to a failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalChain {
    /// Events in temporal order
    pub events: Vec<ChainEvent>,

    /// Sum of pairwise weights along the chain
    pub weight: f64,

    /// `1 - e^(-weight)`, in [0, 1)
    pub strength: f64,

    /// Stepwise explanation in temporal order
    pub interpretation: String,
}

impl CausalChain {
    pub fn empty() -> Self {
        Self {
            events: Vec::new(),
            weight: 0.0,
            strength: 0.0,
            interpretation: String::new(),
        }
    }

    /// Service of the first event
    pub fn origin_service(&self) -> Option<&str> {
        self.events.first().map(|e| e.service.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

/// A (service, metric) treatment with its estimated effect on error rate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CausalCandidate {
    pub service: String,
    pub metric: String,

    /// Backdoor-adjusted difference in error rate, in [0, 1]
    pub effect: f64,

    /// Effect discounted by how many buckets were treated
    pub confidence: f64,

    /// Observed buckets where the treatment was active
    pub treated_buckets: usize,
}

/// Conclusive analysis
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RcaResult {
    pub correlation_id: String,
    pub root_cause_service: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_cause_metric: Option<String>,

    pub confidence: f64,

    pub causal_chain: CausalChain,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counterfactual: Option<String>,

    /// Ranked by confidence, highest first
    pub candidates: Vec<CausalCandidate>,

    /// Prose explanation; only ever set by a narrator
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub narrative: Option<String>,
}

/// Analysis outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RcaOutcome {
    Conclusive { result: RcaResult },
    Inconclusive {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        best_candidate: Option<String>,
        best_confidence: f64,
    },
}

impl RcaOutcome {
    pub fn is_conclusive(&self) -> bool {
        matches!(self, RcaOutcome::Conclusive { .. })
    }

    pub fn result(&self) -> Option<&RcaResult> {
        match self {
            RcaOutcome::Conclusive { result } => Some(result),
            RcaOutcome::Inconclusive { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_json_shape() {
        let outcome = RcaOutcome::Inconclusive {
            reason: "no error events".into(),
            best_candidate: None,
            best_confidence: 0.0,
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "inconclusive");
        assert_eq!(json["reason"], "no error events");

        let outcome = RcaOutcome::Conclusive {
            result: RcaResult {
                correlation_id: "flow".into(),
                root_cause_service: "db".into(),
                root_cause_metric: Some("db.pool.wait_ms".into()),
                confidence: 0.9,
                causal_chain: CausalChain::empty(),
                counterfactual: None,
                candidates: Vec::new(),
                narrative: None,
            },
        };
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "conclusive");
        assert_eq!(json["result"]["root_cause_service"], "db");
        assert!(json["result"].get("narrative").is_none());
    }
}
