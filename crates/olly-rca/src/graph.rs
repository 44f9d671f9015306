//! Service dependency graph
//!
//! Directed caller -> callee graph built from the dependency edges of one
//! context. Every service that emitted any record is a node, even without
//! edges.

use olly_core::context::CorrelatedContext;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default)]
pub struct ServiceGraph {
    nodes: BTreeSet<String>,
    /// caller -> callees
    callees: BTreeMap<String, BTreeSet<String>>,
    /// callee -> callers
    callers: BTreeMap<String, BTreeSet<String>>,
}

impl ServiceGraph {
    pub fn from_context(ctx: &CorrelatedContext) -> Self {
        let mut graph = Self::default();
        for service in &ctx.summary.services {
            graph.nodes.insert(service.clone());
        }
        for edge in &ctx.dependencies {
            graph.add_edge(&edge.source, &edge.target);
        }
        graph
    }

    pub fn add_edge(&mut self, source: &str, target: &str) {
        self.nodes.insert(source.to_string());
        self.nodes.insert(target.to_string());
        self.callees
            .entry(source.to_string())
            .or_default()
            .insert(target.to_string());
        self.callers
            .entry(target.to_string())
            .or_default()
            .insert(source.to_string());
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.nodes.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Direct callers of `service`
    pub fn callers(&self, service: &str) -> Vec<&str> {
        self.callers
            .get(service)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Direct callees of `service`
    pub fn callees(&self, service: &str) -> Vec<&str> {
        self.callees
            .get(service)
            .map(|s| s.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Whether an edge joins the two services in either direction
    pub fn connected(&self, a: &str, b: &str) -> bool {
        let has = |from: &str, to: &str| self.callees.get(from).is_some_and(|c| c.contains(to));
        has(a, b) || has(b, a)
    }

    pub fn edge_count(&self) -> usize {
        self.callees.values().map(BTreeSet::len).sum()
    }
}
