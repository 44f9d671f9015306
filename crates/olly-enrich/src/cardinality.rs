//! Cardinality guard
//!
//! Bounded sliding-window uniqueness limiter for attribute values. Each
//! attribute name owns a window of `value -> last seen`; windows live in a
//! sharded map so concurrent callers on different attributes never contend.

use crate::clock::{Clock, SystemClock};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use olly_core::config::CardinalitySettings;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Replacement value written in place of a rejected attribute value
pub const OVERFLOW_VALUE: &str = "__overflow__";

/// Ten years; keeps `now - window` representable
const MAX_WINDOW_SECS: u64 = 315_360_000;

#[derive(Debug, Default)]
struct AttributeWindow {
    values: HashMap<String, DateTime<Utc>>,
    rejections: u64,
}

impl AttributeWindow {
    fn evict_before(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.values.len();
        self.values.retain(|_, last_seen| *last_seen >= cutoff);
        before - self.values.len()
    }
}

/// Per-attribute guard statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttributeStats {
    pub attribute: String,
    pub live_values: usize,
    pub limit: usize,
    pub rejections: u64,
}

/// Sliding-window distinct-value limiter
pub struct CardinalityGuard {
    windows: DashMap<String, AttributeWindow>,
    default_limit: usize,
    limits: HashMap<String, usize>,
    window: Duration,
    clock: Arc<dyn Clock>,
    total_rejections: AtomicU64,
}

impl CardinalityGuard {
    pub fn new(default_limit: usize, window: Duration) -> Self {
        Self::with_clock(default_limit, window, Arc::new(SystemClock))
    }

    pub fn with_clock(default_limit: usize, window: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            default_limit,
            limits: HashMap::new(),
            window,
            clock,
            total_rejections: AtomicU64::new(0),
        }
    }

    pub fn from_settings(settings: &CardinalitySettings, clock: Arc<dyn Clock>) -> Self {
        let window = Duration::seconds(settings.window_secs.min(MAX_WINDOW_SECS) as i64);
        let mut guard = Self::with_clock(settings.max_values_per_attribute, window, clock);
        guard.limits = settings.limits.clone();
        guard
    }

    /// Override the cap for one attribute; 0 means never allowed
    pub fn with_limit(mut self, attribute: impl Into<String>, limit: usize) -> Self {
        self.limits.insert(attribute.into(), limit);
        self
    }

    pub fn limit_for(&self, attribute: &str) -> usize {
        self.limits.get(attribute).copied().unwrap_or(self.default_limit)
    }

    /// Whether `value` may be kept for `attribute`
    ///
    /// Known values are refreshed; new values are admitted until the cap is
    /// reached. Expired values are evicted lazily before a new value is
    /// refused.
    pub fn allow(&self, attribute: &str, value: &str) -> bool {
        let limit = self.limit_for(attribute);
        let now = self.clock.now();

        let mut window = self.windows.entry(attribute.to_string()).or_default();

        if limit == 0 {
            window.rejections += 1;
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        if let Some(last_seen) = window.values.get_mut(value) {
            *last_seen = now;
            return true;
        }

        if window.values.len() >= limit {
            let evicted = window.evict_before(now - self.window);
            if evicted > 0 {
                debug!("Evicted {} expired values of {}", evicted, attribute);
            }
        }

        if window.values.len() < limit {
            window.values.insert(value.to_string(), now);
            true
        } else {
            window.rejections += 1;
            self.total_rejections.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Remove every value last seen before `now - window`; returns the count
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let mut removed = 0;
        for mut entry in self.windows.iter_mut() {
            removed += entry.value_mut().evict_before(cutoff);
        }
        self.windows.retain(|_, w| !w.values.is_empty() || w.rejections > 0);
        removed
    }

    /// Run `sweep_expired` on an interval until the task is aborted
    pub fn spawn_sweeper(self: &Arc<Self>, every: std::time::Duration) -> JoinHandle<()> {
        let guard = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!("Cardinality sweeper started (every {:?})", every);
            loop {
                ticker.tick().await;
                let removed = guard.sweep_expired(guard.clock.now());
                if removed > 0 {
                    debug!("Cardinality sweep removed {} values", removed);
                }
            }
        })
    }

    /// Live value count for one attribute
    pub fn live_values(&self, attribute: &str) -> usize {
        self.windows.get(attribute).map(|w| w.values.len()).unwrap_or(0)
    }

    pub fn total_rejections(&self) -> u64 {
        self.total_rejections.load(Ordering::Relaxed)
    }

    /// Statistics for every tracked attribute, sorted by name
    pub fn stats(&self) -> Vec<AttributeStats> {
        let mut stats: Vec<AttributeStats> = self
            .windows
            .iter()
            .map(|entry| AttributeStats {
                attribute: entry.key().clone(),
                live_values: entry.value().values.len(),
                limit: self.limit_for(entry.key()),
                rejections: entry.value().rejections,
            })
            .collect();
        stats.sort_by(|a, b| a.attribute.cmp(&b.attribute));
        stats
    }
}
