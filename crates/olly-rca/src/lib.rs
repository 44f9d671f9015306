//! Olly RCA - root-cause analysis over a correlated context
//!
//! - `graph`: service dependency graph
//! - `causal`: bucketed, backdoor-adjusted effect of metric anomalies on error rate
//! - `chain`: weighted chain-of-event analysis
//! - `analyzer`: merges both into a conclusive or inconclusive outcome
//! - `narrator`: optional prose for an already-decided result

pub mod analyzer;
pub mod causal;
pub mod chain;
pub mod graph;
pub mod model;
pub mod narrator;

pub use analyzer::{RcaService, RootCauseAnalyzer};
pub use graph::ServiceGraph;
pub use model::{CausalCandidate, CausalChain, ChainEvent, ChainEventKind, RcaOutcome, RcaResult};
pub use narrator::{LlmNarrator, Narrator, NarratorError, StaticNarrator};
