//! Key to shard routing

use crate::key::NodeKey;
use xxhash_rust::xxh3::xxh3_64;

/// Maps keys onto a fixed set of independently locked shards
#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    shard_count: usize,
}

impl ShardRouter {
    /// `shard_count` must be non-zero; config validation guarantees it.
    pub fn new(shard_count: usize) -> Self {
        debug_assert!(shard_count > 0);
        Self {
            shard_count: shard_count.max(1),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    /// Fast 64-bit hash of a key, shared by routing and per-shard indexes
    #[inline(always)]
    pub fn hash(key: &NodeKey) -> u64 {
        xxh3_64(key.as_bytes())
    }

    /// Shard index for a precomputed hash.
    ///
    /// Uses the high half so per-shard tables indexed by the low bits stay
    /// uniformly loaded.
    #[inline(always)]
    pub fn shard_for_hash(&self, hash: u64) -> usize {
        ((hash >> 32) as usize) % self.shard_count
    }

    #[inline]
    pub fn route(&self, key: &NodeKey) -> (usize, u64) {
        let hash = Self::hash(key);
        (self.shard_for_hash(hash), hash)
    }
}
