//! Read-through context cache
//!
//! Contexts are derived views, so entries only need a TTL and a size bound.
//! Nothing here is authoritative.

use dashmap::DashMap;
use olly_core::context::CorrelatedContext;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct CacheEntry {
    context: Arc<CorrelatedContext>,
    inserted: Instant,
}

/// TTL cache keyed by correlation identity key
pub struct ContextCache {
    entries: DashMap<String, CacheEntry>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ContextCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Fresh entry for `key`; expired entries are removed on the way
    pub fn get(&self, key: &str) -> Option<Arc<CorrelatedContext>> {
        let fresh = self.entries.get(key).and_then(|entry| {
            (entry.inserted.elapsed() < self.ttl).then(|| Arc::clone(&entry.context))
        });

        match fresh {
            Some(context) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(context)
            }
            None => {
                self.entries.remove_if(key, |_, e| e.inserted.elapsed() >= self.ttl);
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn insert(&self, key: impl Into<String>, context: Arc<CorrelatedContext>) {
        if self.max_entries == 0 || self.ttl.is_zero() {
            return;
        }
        let key = key.into();

        if !self.entries.contains_key(&key) && self.entries.len() >= self.max_entries {
            self.evict();
        }

        self.entries.insert(
            key,
            CacheEntry {
                context,
                inserted: Instant::now(),
            },
        );
    }

    /// Drop expired entries, then the oldest one if still full
    fn evict(&self) {
        self.entries.retain(|_, e| e.inserted.elapsed() < self.ttl);
        if self.entries.len() < self.max_entries {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.value().inserted)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
        }
    }

    pub fn invalidate(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}
