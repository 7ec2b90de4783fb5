//! Per-shard counters and aggregated statistics snapshots

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Pads a value to its own cache line so neighbouring shard counters do not
/// false-share.
#[cfg_attr(target_arch = "aarch64", repr(align(128)))]
#[cfg_attr(not(target_arch = "aarch64"), repr(align(64)))]
#[derive(Debug, Default)]
pub struct CacheLineAligned<T>(pub T);

/// Atomic operation counters owned by one shard
#[derive(Debug, Default)]
pub struct ShardCounters {
    gets: CacheLineAligned<AtomicU64>,
    hits: CacheLineAligned<AtomicU64>,
    misses: CacheLineAligned<AtomicU64>,
    sets: CacheLineAligned<AtomicU64>,
    evictions: CacheLineAligned<AtomicU64>,
}

impl ShardCounters {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline(always)]
    pub fn record_hit(&self) {
        self.gets.0.fetch_add(1, Ordering::Relaxed);
        self.hits.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_miss(&self) {
        self.gets.0.fetch_add(1, Ordering::Relaxed);
        self.misses.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_lookup(&self, hit: bool) {
        if hit {
            self.record_hit();
        } else {
            self.record_miss();
        }
    }

    #[inline(always)]
    pub fn record_set(&self) {
        self.sets.0.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_evictions(&self, count: u64) {
        if count > 0 {
            self.evictions.0.fetch_add(count, Ordering::Relaxed);
        }
    }

    /// Counter values only; item and memory figures are left at zero for the
    /// owning strategy to fill in.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets.0.load(Ordering::Relaxed),
            hits: self.hits.0.load(Ordering::Relaxed),
            misses: self.misses.0.load(Ordering::Relaxed),
            sets: self.sets.0.load(Ordering::Relaxed),
            evictions: self.evictions.0.load(Ordering::Relaxed),
            ..StatsSnapshot::default()
        }
    }
}

/// Immutable point-in-time view of cache activity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub gets: u64,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub evictions: u64,
    /// Live entries currently resident
    pub items: u64,
    /// Estimated resident memory in bytes
    pub memory_bytes: u64,
    /// Configured byte budget
    pub capacity_bytes: u64,
}

impl StatsSnapshot {
    /// Fraction of lookups that hit, or 0.0 before any lookup
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            0.0
        } else {
            self.hits as f64 / lookups as f64
        }
    }

    #[must_use]
    pub fn with_capacity_bytes(mut self, capacity_bytes: u64) -> StatsSnapshot {
        self.capacity_bytes = capacity_bytes;
        self
    }

    /// Field-wise sum of two snapshots
    #[must_use]
    pub fn merge(&self, other: &StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            gets: self.gets + other.gets,
            hits: self.hits + other.hits,
            misses: self.misses + other.misses,
            sets: self.sets + other.sets,
            evictions: self.evictions + other.evictions,
            items: self.items + other.items,
            memory_bytes: self.memory_bytes + other.memory_bytes,
            capacity_bytes: self.capacity_bytes + other.capacity_bytes,
        }
    }
}

impl std::iter::Sum for StatsSnapshot {
    fn sum<I: Iterator<Item = StatsSnapshot>>(iter: I) -> Self {
        iter.fold(StatsSnapshot::default(), |acc, s| acc.merge(&s))
    }
}
