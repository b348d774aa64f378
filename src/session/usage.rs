//! Per-shard routing counters
//!
//! Tracks how many sessions were written to and read from each shard
//! identity since startup. Observability only.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters for a single shard identity
#[derive(Debug, Default)]
pub struct UsageEntry {
    pub saves: AtomicU64,
    pub hits: AtomicU64,
    pub misses: AtomicU64,
}

/// Shared usage counters, keyed by shard identity
#[derive(Debug, Clone, Default)]
pub struct RouterUsage {
    inner: Arc<DashMap<String, UsageEntry>>,
}

impl RouterUsage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment the save counter for a shard
    pub fn record_save(&self, identity: &str) {
        self.entry(identity, |e| &e.saves);
    }

    /// Increment the hit counter for a shard
    pub fn record_hit(&self, identity: &str) {
        self.entry(identity, |e| &e.hits);
    }

    /// Increment the miss counter for a shard
    pub fn record_miss(&self, identity: &str) {
        self.entry(identity, |e| &e.misses);
    }

    fn entry(&self, identity: &str, counter: impl Fn(&UsageEntry) -> &AtomicU64) {
        // Fast path avoids allocating the key for known shards
        if let Some(entry) = self.inner.get(identity) {
            counter(entry.value()).fetch_add(1, Ordering::Relaxed);
            return;
        }
        let entry = self.inner.entry(identity.to_string()).or_default();
        counter(entry.value()).fetch_add(1, Ordering::Relaxed);
    }

    /// Saves routed to a shard
    pub fn saves(&self, identity: &str) -> u64 {
        self.inner
            .get(identity)
            .map_or(0, |e| e.saves.load(Ordering::Relaxed))
    }

    /// Total saves across all shards
    pub fn total_saves(&self) -> u64 {
        self.inner
            .iter()
            .map(|e| e.saves.load(Ordering::Relaxed))
            .sum()
    }

    /// Saves per shard identity
    pub fn saves_by_shard(&self) -> Vec<(String, u64)> {
        let mut out: Vec<(String, u64)> = self
            .inner
            .iter()
            .map(|e| (e.key().clone(), e.saves.load(Ordering::Relaxed)))
            .collect();
        out.sort();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let usage = RouterUsage::new();
        usage.record_save("a");
        usage.record_save("a");
        usage.record_save("b");
        usage.record_hit("a");
        assert_eq!(usage.saves("a"), 2);
        assert_eq!(usage.saves("missing"), 0);
        assert_eq!(usage.total_saves(), 3);
        assert_eq!(
            usage.saves_by_shard(),
            vec![("a".to_string(), 2), ("b".to_string(), 1)]
        );
    }
}
