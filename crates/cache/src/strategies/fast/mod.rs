//! Fixed-memory byte cache built on per-shard ring arenas
//!
//! All memory is allocated up front: an arena and an offset index per shard.
//! Inserts append to the arena and wrap around when it is full, implicitly
//! evicting whatever occupied the overwritten region regardless of recency.
//! Memory use is a hard bound; no allocation happens per entry.

mod ring;

pub use ring::{InsertOutcome, RingShard, ENTRY_HEADER_LEN, INDEX_SLOT_LEN, MAX_PROBE};

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

/// Smallest per-shard budget accepted at construction
pub const MIN_SHARD_BYTES: u64 = 4 * 1024;

/// Smallest value the index is sized for. Trie nodes are commonly a few
/// dozen bytes.
const INDEX_VALUE_HINT: u64 = 48;

/// Index slots per arena entry of the hinted size, keeping the load factor
/// at or below one half
const SLOTS_PER_ENTRY: u64 = 2;

const MIN_INDEX_SLOTS: u64 = 16;

struct Slot {
    ring: Mutex<RingShard>,
    counters: ShardCounters,
}

/// Ring-arena strategy with a hard memory bound
pub struct FastByteCache {
    router: ShardRouter,
    slots: Box<[Slot]>,
    capacity_bytes: u64,
    closed: AtomicBool,
}

/// Split a per-shard budget into (arena bytes, index slots).
///
/// Each hinted entry is charged its arena bytes plus `SLOTS_PER_ENTRY` index
/// slots, rounding the slot count up.
fn shard_layout(shard_bytes: u64) -> (usize, usize) {
    let slot_len = INDEX_SLOT_LEN as u64;
    let per_entry = ENTRY_HEADER_LEN as u64 + INDEX_VALUE_HINT + SLOTS_PER_ENTRY * slot_len;
    let slot_count = (SLOTS_PER_ENTRY * shard_bytes)
        .div_ceil(per_entry)
        .max(MIN_INDEX_SLOTS);
    let index_bytes = slot_count * slot_len;
    ((shard_bytes - index_bytes) as usize, slot_count as usize)
}

impl FastByteCache {
    /// Build a cache whose arenas and indexes together use exactly
    /// `max_bytes` (rounded down to a multiple of `shard_count`).
    pub fn new(max_bytes: u64, shard_count: usize) -> Result<Self> {
        if max_bytes == 0 || shard_count == 0 {
            return Err(CacheError::Configuration {
                message: format!(
                    "Fast cache needs a positive byte budget and shard count (got {max_bytes} bytes, {shard_count} shards)"
                ),
                recovery_hint: RecoveryHint::UseDefault {
                    value: "max_bytes=512MiB, shard_count=64".to_string(),
                },
            });
        }

        let shard_bytes = max_bytes / shard_count as u64;
        if shard_bytes < MIN_SHARD_BYTES {
            return Err(CacheError::Configuration {
                message: format!(
                    "Fast cache shards need at least {MIN_SHARD_BYTES} bytes each, {max_bytes} bytes over {shard_count} shards gives {shard_bytes}"
                ),
                recovery_hint: RecoveryHint::Manual {
                    instructions: "Raise the byte budget or lower the shard count".to_string(),
                },
            });
        }

        let (arena_len, slot_count) = shard_layout(shard_bytes);
        let slots: Box<[Slot]> = (0..shard_count)
            .map(|_| Slot {
                ring: Mutex::new(RingShard::new(arena_len, slot_count)),
                counters: ShardCounters::new(),
            })
            .collect();

        tracing::debug!(
            shard_count,
            arena_len,
            slot_count,
            "Allocated fast cache arenas"
        );

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

    /// Append the value for `key` to `dst` without allocating.
    ///
    /// Returns `false` on a miss, leaving `dst` untouched.
    pub fn get_into(&self, key: &NodeKey, dst: &mut Vec<u8>) -> bool {
        let (shard, hash) = self.router.route(key);
        let slot = &self.slots[shard];
        let hit = match slot.ring.lock().value(hash, key) {
            Some(value) => {
                dst.extend_from_slice(value);
                true
            }
            None => false,
        };
        slot.counters.record_lookup(hit);
        hit
    }

    fn lookup(&self, key: &NodeKey) -> Option<Bytes> {
        let (shard, hash) = self.router.route(key);
        let slot = &self.slots[shard];
        let value = slot
            .ring
            .lock()
            .value(hash, key)
            .map(Bytes::copy_from_slice);
        slot.counters.record_lookup(value.is_some());
        value
    }

    /// Insert without touching the `sets` counter. Returns `false` when the
    /// value is too large for a shard or the cache is closed.
    pub(crate) fn insert(&self, key: &NodeKey, value: &[u8]) -> bool {
        self.store(key, value, false)
    }

    /// Copy a value found elsewhere into this cache unless the key already
    /// has a live entry, which is never overwritten. Returns whether the
    /// value was written.
    pub(crate) fn promote(&self, key: &NodeKey, value: &[u8]) -> bool {
        self.store(key, value, true)
    }

    fn store(&self, key: &NodeKey, value: &[u8], only_if_absent: bool) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let (shard, hash) = self.router.route(key);
        let slot = &self.slots[shard];
        let outcome = {
            let mut ring = slot.ring.lock();
            if only_if_absent {
                ring.insert_if_absent(hash, key, value)
            } else {
                ring.insert(hash, key, value)
            }
        };
        match outcome {
            InsertOutcome::Stored(evicted) => {
                slot.counters.record_evictions(evicted);
                true
            }
            InsertOutcome::Present => false,
            InsertOutcome::Rejected { dropped_stale } => {
                if dropped_stale {
                    slot.counters.record_evictions(1);
                }
                tracing::trace!(key = %key, len = value.len(), "Value does not fit a shard arena, not cached");
                false
            }
        }
    }

    /// Index slots of each shard
    pub fn index_slots_per_shard(&self) -> usize {
        self.slots
            .first()
            .map(|slot| slot.ring.lock().slot_count())
            .unwrap_or(0)
    }

    /// Live entries across all shards
    pub fn len(&self) -> u64 {
        self.slots.iter().map(|s| s.ring.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Restore shards from a snapshot directory
    pub fn load_from_dir(&self, dir: &Path) -> storage::LoadReport {
        storage::load_snapshot(self, dir)
    }
}

impl TrieNodeCache for FastByteCache {
    fn get(&self, key: &NodeKey) -> Option<Bytes> {
        self.lookup(key)
    }

    fn has(&self, key: &NodeKey) -> Option<Bytes> {
        self.lookup(key)
    }

    fn set(&self, key: &NodeKey, value: &[u8]) {
        let (shard, _) = self.router.route(key);
        self.slots[shard].counters.record_set();
        self.insert(key, value);
    }

    fn close(&self) -> Result<()> {
        if !self.closed.swap(true, Ordering::AcqRel) {
            for slot in self.slots.iter() {
                slot.ring.lock().release();
            }
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
                let (items, resident) = {
                    let ring = slot.ring.lock();
                    (ring.len(), ring.resident_bytes())
                };
                StatsSnapshot {
                    items,
                    memory_bytes: resident,
                    ..slot.counters.snapshot()
                }
            })
            .sum::<StatsSnapshot>()
            .with_capacity_bytes(self.capacity_bytes)
    }
}

impl SnapshotSource for FastByteCache {
    fn snapshot_kind(&self) -> SnapshotKind {
        SnapshotKind::Fast
    }

    fn shard_count(&self) -> usize {
        self.slots.len()
    }

    fn copy_shard(&self, shard: usize, out: &mut RecordBuffer) {
        self.slots[shard]
            .ring
            .lock()
            .for_each_live(|key, value| out.push(key, value));
    }

    fn restore(&self, key: &NodeKey, value: &[u8]) {
        self.insert(key, value);
    }
}
