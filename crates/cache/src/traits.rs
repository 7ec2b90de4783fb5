//! Capability contract shared by every cache strategy

use crate::errors::Result;
use crate::key::NodeKey;
use crate::stats::StatsSnapshot;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

/// Operations the trie layer, lifecycle management and telemetry use.
///
/// Lookups and writes never fail: a miss is `None`, and eviction is silent.
/// Only the lifecycle operations return errors.
#[cfg_attr(test, mockall::automock)]
pub trait TrieNodeCache: Send + Sync {
    /// Look up a node. Returned bytes are shared and must be treated as
    /// read-only.
    fn get(&self, key: &NodeKey) -> Option<Bytes>;

    /// Existence check that also yields the payload. Always agrees with
    /// [`TrieNodeCache::get`] for the same key at the same point in time.
    fn has(&self, key: &NodeKey) -> Option<Bytes>;

    /// Insert or replace a node; may evict synchronously within the key's shard.
    fn set(&self, key: &NodeKey, value: &[u8]);

    /// Stop background work, flush if configured and release memory.
    fn close(&self) -> Result<()>;

    /// Write one snapshot file per shard into `dir` using up to
    /// `concurrency` workers.
    fn save_to_file(&self, dir: &Path, concurrency: usize) -> Result<()>;

    /// Aggregate per-shard counters into a fresh snapshot.
    fn update_stats(&self) -> StatsSnapshot;
}

impl<T: TrieNodeCache + ?Sized> TrieNodeCache for Arc<T> {
    fn get(&self, key: &NodeKey) -> Option<Bytes> {
        (**self).get(key)
    }

    fn has(&self, key: &NodeKey) -> Option<Bytes> {
        (**self).has(key)
    }

    fn set(&self, key: &NodeKey, value: &[u8]) {
        (**self).set(key, value)
    }

    fn close(&self) -> Result<()> {
        (**self).close()
    }

    fn save_to_file(&self, dir: &Path, concurrency: usize) -> Result<()> {
        (**self).save_to_file(dir, concurrency)
    }

    fn update_stats(&self) -> StatsSnapshot {
        (**self).update_stats()
    }
}
