//! Two-tier cache: a small ring-arena hot tier in front of a larger LRU tier
//!
//! Lookups try the hot tier first and promote warm hits into it. Nothing is
//! ever demoted from hot to warm.
//!
//! Writes go to both tiers rather than to the hot tier alone, so an entry that
//! falls out of the hot ring is usually still warm and the warm tier does not
//! depend on the store to be refilled. The combined `sets` counter is taken
//! from the hot tier and counts each write once.
//!
//! A write and a promotion of the same key are serialized by a lock striped
//! by shard, and a promotion never overwrites a live hot entry. A reader
//! holding an older warm value therefore cannot put it back in front of a
//! newer write.

use crate::errors::{CacheError, RecoveryHint, Result};
use crate::key::NodeKey;
use crate::shard::ShardRouter;
use crate::stats::StatsSnapshot;
use crate::storage::LoadReport;
use crate::strategies::fast::{FastByteCache, MIN_SHARD_BYTES};
use crate::strategies::lru::ShardedLruCache;
use crate::traits::TrieNodeCache;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot subdirectory of the hot tier
pub const HOT_DIR: &str = "hot";
/// Snapshot subdirectory of the warm tier
pub const WARM_DIR: &str = "warm";

/// Per-tier statistics of a [`HybridCache`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TierStats {
    pub hot: StatsSnapshot,
    pub warm: StatsSnapshot,
    /// Warm hits copied into the hot tier
    pub promotions: u64,
}

pub struct HybridCache {
    hot: FastByteCache,
    warm: ShardedLruCache,
    router: ShardRouter,
    write_locks: Box<[Mutex<()>]>,
    promotions: AtomicU64,
}

impl HybridCache {
    pub fn new(
        hot_bytes: u64,
        warm_bytes: u64,
        warm_items: Option<u64>,
        shard_count: usize,
    ) -> Result<Self> {
        if hot_bytes < MIN_SHARD_BYTES {
            return Err(CacheError::Configuration {
                message: format!(
                    "Hybrid hot tier needs at least {MIN_SHARD_BYTES} bytes, got {hot_bytes}"
                ),
                recovery_hint: RecoveryHint::UseDefault {
                    value: "1/16 of max_bytes".to_string(),
                },
            });
        }
        // A small hot tier gets fewer, larger shards rather than failing
        let hot_shards = shard_count.min((hot_bytes / MIN_SHARD_BYTES) as usize).max(1);

        Ok(Self {
            hot: FastByteCache::new(hot_bytes, hot_shards)?,
            warm: ShardedLruCache::new(warm_bytes, warm_items, shard_count)?,
            router: ShardRouter::new(shard_count),
            write_locks: (0..shard_count.max(1)).map(|_| Mutex::new(())).collect(),
            promotions: AtomicU64::new(0),
        })
    }

    pub fn hot(&self) -> &FastByteCache {
        &self.hot
    }

    pub fn warm(&self) -> &ShardedLruCache {
        &self.warm
    }

    pub fn tier_stats(&self) -> TierStats {
        TierStats {
            hot: self.hot.update_stats(),
            warm: self.warm.update_stats(),
            promotions: self.promotions.load(Ordering::Relaxed),
        }
    }

    #[inline]
    fn write_lock(&self, key: &NodeKey) -> &Mutex<()> {
        let (shard, _) = self.router.route(key);
        &self.write_locks[shard]
    }

    fn lookup(&self, key: &NodeKey) -> Option<Bytes> {
        if let Some(value) = self.hot.get(key) {
            return Some(value);
        }
        let _guard = self.write_lock(key).lock();
        let value = self.warm.get(key)?;
        if self.hot.promote(key, &value) {
            self.promotions.fetch_add(1, Ordering::Relaxed);
        }
        Some(value)
    }

    /// Restore both tiers from `dir/hot` and `dir/warm`
    pub fn load_from_dir(&self, dir: &Path) -> LoadReport {
        let warm = self.warm.load_from_dir(&dir.join(WARM_DIR));
        let hot = self.hot.load_from_dir(&dir.join(HOT_DIR));
        warm.merge(&hot)
    }
}

impl TrieNodeCache for HybridCache {
    fn get(&self, key: &NodeKey) -> Option<Bytes> {
        self.lookup(key)
    }

    fn has(&self, key: &NodeKey) -> Option<Bytes> {
        self.lookup(key)
    }

    fn set(&self, key: &NodeKey, value: &[u8]) {
        let _guard = self.write_lock(key).lock();
        self.hot.set(key, value);
        self.warm.set(key, value);
    }

    fn close(&self) -> Result<()> {
        let hot = self.hot.close();
        let warm = self.warm.close();
        hot.and(warm)
    }

    fn save_to_file(&self, dir: &Path, concurrency: usize) -> Result<()> {
        self.warm.save_to_file(&dir.join(WARM_DIR), concurrency)?;
        self.hot.save_to_file(&dir.join(HOT_DIR), concurrency)
    }

    /// Combined view: every lookup counts once, as a hit if either tier
    /// served it.
    fn update_stats(&self) -> StatsSnapshot {
        let TierStats { hot, warm, .. } = self.tier_stats();
        StatsSnapshot {
            gets: hot.gets,
            hits: hot.hits + warm.hits,
            misses: warm.misses,
            sets: hot.sets,
            evictions: hot.evictions + warm.evictions,
            items: warm.items,
            memory_bytes: hot.memory_bytes + warm.memory_bytes,
            capacity_bytes: hot.capacity_bytes + warm.capacity_bytes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(n: u32) -> NodeKey {
        let mut bytes = [0u8; 32];
        bytes[28..].copy_from_slice(&n.to_be_bytes());
        NodeKey::new(bytes)
    }

    fn small() -> HybridCache {
        HybridCache::new(MIN_SHARD_BYTES, 1 << 20, None, 4).unwrap()
    }

    #[test]
    fn test_set_reaches_both_tiers() {
        let cache = small();
        cache.set(&key(1), b"leaf");

        let stats = cache.tier_stats();
        assert_eq!(stats.hot.items, 1);
        assert_eq!(stats.warm.items, 1);
        assert_eq!(cache.get(&key(1)).as_deref(), Some(&b"leaf"[..]));
        assert_eq!(cache.has(&key(1)), cache.get(&key(1)));
        assert!(cache.get(&key(2)).is_none());
    }

    #[test]
    fn test_warm_hit_is_promoted() {
        let cache = small();
        let value = vec![3u8; 200];
        // Far more than the hot ring holds
        for i in 0..200 {
            cache.set(&key(i), &value);
        }
        assert!(cache.hot().get(&key(0)).is_none());

        assert_eq!(cache.get(&key(0)).as_deref(), Some(&value[..]));
        assert_eq!(cache.tier_stats().promotions, 1);
        assert!(cache.hot().get(&key(0)).is_some());
    }

    #[test]
    fn test_combined_stats_count_each_lookup_once() {
        let cache = small();
        cache.set(&key(1), b"a");
        cache.get(&key(1));
        cache.get(&key(2));

        let stats = cache.update_stats();
        assert_eq!(stats.gets, 2);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.sets, 1);
    }

    #[test]
    fn test_stale_promotion_loses_to_newer_write() {
        let cache = small();
        cache.set(&key(1), b"old");
        let fetched_by_reader = cache.warm().get(&key(1)).unwrap();

        cache.set(&key(1), b"new");
        assert!(!cache.hot().promote(&key(1), &fetched_by_reader));
        assert_eq!(cache.get(&key(1)).as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_value_too_large_for_hot_tier_is_served_warm() {
        let cache = small();
        cache.set(&key(1), b"small");
        let large = vec![9u8; 8192];
        cache.set(&key(1), &large);

        assert!(cache.hot().get(&key(1)).is_none());
        assert_eq!(cache.get(&key(1)).as_deref(), Some(&large[..]));
    }

    #[test]
    fn test_reads_see_own_writes_under_promotion_churn() {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let cache = Arc::new(small());
        let stop = Arc::new(AtomicBool::new(false));
        let target = key(0);

        let mut handles = Vec::new();
        for t in 0..3u32 {
            let cache = Arc::clone(&cache);
            let stop = Arc::clone(&stop);
            handles.push(std::thread::spawn(move || {
                let mut n = 0u32;
                while !stop.load(Ordering::Relaxed) {
                    if t == 0 {
                        // Push the target out of the hot ring
                        cache.set(&key(1 + n % 64), &[t as u8; 200]);
                    } else {
                        cache.get(&key(0));
                    }
                    n = n.wrapping_add(1);
                }
            }));
        }

        for i in 0..50_000u32 {
            cache.set(&target, &i.to_le_bytes());
            assert_eq!(cache.get(&target).as_deref(), Some(&i.to_le_bytes()[..]));
        }
        stop.store(true, Ordering::Relaxed);
        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_small_hot_tier_uses_fewer_shards() {
        let cache = HybridCache::new(MIN_SHARD_BYTES * 2, 1 << 20, None, 64).unwrap();
        assert_eq!(cache.hot().shard_count(), 2);
        assert_eq!(cache.warm().shard_count(), 64);
        assert!(HybridCache::new(MIN_SHARD_BYTES - 1, 1 << 20, None, 4).is_err());
    }

    #[test]
    fn test_snapshot_covers_both_tiers() {
        let dir = tempfile::TempDir::new().unwrap();
        let cache = small();
        for i in 0..50 {
            cache.set(&key(i), &i.to_le_bytes());
        }
        cache.save_to_file(dir.path(), 2).unwrap();
        assert!(dir.path().join(HOT_DIR).is_dir());
        assert!(dir.path().join(WARM_DIR).is_dir());

        let restored = small();
        let report = restored.load_from_dir(dir.path());
        assert_eq!(report.files_skipped, 0);
        for i in 0..50u32 {
            assert_eq!(restored.get(&key(i)).as_deref(), Some(&i.to_le_bytes()[..]));
        }
    }
}
