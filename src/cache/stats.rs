//! Hit/miss/eviction/invalidation counters and the health snapshot built
//! from them.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

use super::storage_quota::QuotaStats;

/// Monotonic counters scoped to one cache instance
#[derive(Debug, Default)]
pub struct CacheStatistics {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, count: u64) {
        self.evictions.fetch_add(count, Ordering::Relaxed);
    }

    pub fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Only called by an explicit clear
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.evictions.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatisticsSnapshot {
        StatisticsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheStatistics`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatisticsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub invalidations: u64,
}

impl StatisticsSnapshot {
    pub fn lookups(&self) -> u64 {
        self.hits + self.misses
    }

    pub fn hit_rate(&self) -> f64 {
        match self.lookups() {
            0 => 0.0,
            total => self.hits as f64 / total as f64,
        }
    }
}

impl std::fmt::Display for StatisticsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} hits, {} misses ({:.1}% hit rate), {} evictions, {} invalidations",
            self.hits,
            self.misses,
            self.hit_rate() * 100.0,
            self.evictions,
            self.invalidations
        )
    }
}

/// Counters of each tier of a [`TieredCacheStore`](super::TieredCacheStore)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TieredStatistics {
    /// Lookups answered by either tier versus factory invocations
    pub combined: StatisticsSnapshot,
    pub durable: StatisticsSnapshot,
    pub volatile: StatisticsSnapshot,
}

/// Read-only health view for external reporting
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub solution_root: String,
    pub cache_root: String,
    pub statistics: TieredStatistics,
    pub durable_entries: usize,
    pub durable_bytes: u64,
    pub durable_max_bytes: u64,
    /// `durable_bytes / durable_max_bytes`
    pub utilization: f64,
    pub volatile_entries: usize,
    pub tracked_files: usize,
    pub registered_dependencies: usize,
    pub quota: Option<QuotaStats>,
    pub last_cleanup: Option<DateTime<Utc>>,
}

pub fn utilization(used: u64, budget: u64) -> f64 {
    if budget == 0 {
        return 0.0;
    }
    used as f64 / budget as f64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate_and_reset() {
        let stats = CacheStatistics::new();
        stats.record_hit();
        stats.record_hit();
        stats.record_miss();
        stats.record_evictions(3);
        stats.record_invalidation();

        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.evictions, 3);
        assert_eq!(snap.invalidations, 1);
        assert!((snap.hit_rate() - 2.0 / 3.0).abs() < f64::EPSILON);

        stats.reset();
        assert_eq!(stats.snapshot(), StatisticsSnapshot::default());
    }

    #[test]
    fn test_hit_rate_without_lookups() {
        assert_eq!(StatisticsSnapshot::default().hit_rate(), 0.0);
    }

    #[test]
    fn test_utilization() {
        assert_eq!(utilization(50, 100), 0.5);
        assert_eq!(utilization(10, 0), 0.0);
    }
}
