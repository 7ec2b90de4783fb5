//! Sharded, capacity-bounded LRU cache
//!
//! Each shard owns an exclusive lock over its index and recency list. A lock
//! is held for exactly one lookup, insert or eviction pass.

mod shard;

pub use shard::{entry_cost, LruShard, ENTRY_OVERHEAD};

use crate::errors::{CacheError, RecoveryHint, Result};
use crate::key::NodeKey;
use crate::shard::ShardRouter;
use crate::stats::{ShardCounters, StatsSnapshot};
use crate::storage::{self, RecordBuffer, SnapshotKind, SnapshotSource};
use crate::traits::TrieNodeCache;
use bytes::Bytes;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

struct Slot {
    lru: Mutex<LruShard>,
    counters: ShardCounters,
}

/// Approximate-LRU strategy with a per-shard byte and item budget
pub struct ShardedLruCache {
    router: ShardRouter,
    slots: Box<[Slot]>,
    capacity_bytes: u64,
    closed: AtomicBool,
}

impl ShardedLruCache {
    /// Build a cache with `max_bytes` split evenly across `shard_count`
    /// shards, optionally also bounded to `max_items` entries.
    pub fn new(max_bytes: u64, max_items: Option<u64>, shard_count: usize) -> Result<Self> {
        if max_bytes == 0 || shard_count == 0 {
            return Err(CacheError::Configuration {
                message: format!(
                    "LRU cache needs a positive byte budget and shard count (got {max_bytes} bytes, {shard_count} shards)"
                ),
                recovery_hint: RecoveryHint::UseDefault {
                    value: "max_bytes=512MiB, shard_count=64".to_string(),
                },
            });
        }
        if max_items == Some(0) {
            return Err(CacheError::Configuration {
                message: "LRU item budget must be positive".to_string(),
                recovery_hint: RecoveryHint::UseDefault {
                    value: "unbounded".to_string(),
                },
            });
        }

        let shard_bytes = (max_bytes / shard_count as u64).max(1);
        let shard_items = max_items
            .map(|items| items.div_ceil(shard_count as u64))
            .unwrap_or(u64::MAX);

        let slots = (0..shard_count)
            .map(|_| Slot {
                lru: Mutex::new(LruShard::new(shard_bytes, shard_items)),
                counters: ShardCounters::new(),
            })
            .collect();

        Ok(Self {
            router: ShardRouter::new(shard_count),
            slots,
            capacity_bytes: shard_bytes * shard_count as u64,
            closed: AtomicBool::new(false),
        })
    }

    pub fn shard_count(&self) -> usize {
        self.slots.len()
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    #[inline]
    fn slot(&self, key: &NodeKey) -> &Slot {
        let (shard, _) = self.router.route(key);
        &self.slots[shard]
    }

    fn lookup(&self, key: &NodeKey) -> Option<Bytes> {
        let slot = self.slot(key);
        let value = slot.lru.lock().get(key);
        slot.counters.record_lookup(value.is_some());
        value
    }

    fn insert(&self, key: &NodeKey, value: Bytes) -> u64 {
        if self.closed.load(Ordering::Acquire) {
            return 0;
        }
        let slot = self.slot(key);
        let evicted = slot.lru.lock().insert(*key, value);
        slot.counters.record_evictions(evicted);
        evicted
    }

    /// Insert an already shared value without copying it
    pub fn set_bytes(&self, key: &NodeKey, value: Bytes) {
        self.slot(key).counters.record_set();
        self.insert(key, value);
    }

    /// Keys of one shard from most to least recently used
    pub fn shard_keys_by_recency(&self, shard: usize) -> Vec<NodeKey> {
        self.slots[shard].lru.lock().keys_by_recency()
    }

    /// Live entries across all shards
    pub fn len(&self) -> usize {
        self.slots.iter().map(|s| s.lru.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        for slot in self.slots.iter() {
            slot.lru.lock().clear();
        }
    }

    /// Restore shards from a snapshot directory
    pub fn load_from_dir(&self, dir: &Path) -> storage::LoadReport {
        storage::load_snapshot(self, dir)
    }
}

impl TrieNodeCache for ShardedLruCache {
    fn get(&self, key: &NodeKey) -> Option<Bytes> {
        self.lookup(key)
    }

    fn has(&self, key: &NodeKey) -> Option<Bytes> {
        self.lookup(key)
    }

    fn set(&self, key: &NodeKey, value: &[u8]) {
        self.set_bytes(key, Bytes::copy_from_slice(value));
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.clear();
        }
        Ok(())
    }

    fn save_to_file(&self, dir: &Path, concurrency: usize) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(CacheError::Closed {
                operation: "save snapshot",
                recovery_hint: RecoveryHint::None,
            });
        }
        storage::save_snapshot(self, dir, concurrency).map(|_| ())
    }

    fn update_stats(&self) -> StatsSnapshot {
        self.slots
            .iter()
            .map(|slot| {
                let (items, bytes) = {
                    let lru = slot.lru.lock();
                    (lru.len() as u64, lru.bytes())
                };
                StatsSnapshot {
                    items,
                    memory_bytes: bytes,
                    ..slot.counters.snapshot()
                }
            })
            .sum::<StatsSnapshot>()
            .with_capacity_bytes(self.capacity_bytes)
    }
}

impl SnapshotSource for ShardedLruCache {
    fn snapshot_kind(&self) -> SnapshotKind {
        SnapshotKind::Lru
    }

    fn shard_count(&self) -> usize {
        self.slots.len()
    }

    fn copy_shard(&self, shard: usize, out: &mut RecordBuffer) {
        // Values are reference counted, so copying under the lock is cheap;
        // encoding happens after it is released.
        let mut entries = Vec::new();
        self.slots[shard]
            .lru
            .lock()
            .for_each_oldest_first(|key, value| entries.push((*key, value.clone())));
        for (key, value) in &entries {
            out.push(key, value);
        }
    }

    fn restore(&self, key: &NodeKey, value: &[u8]) {
        self.insert(key, Bytes::copy_from_slice(value));
    }
}
