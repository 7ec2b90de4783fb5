//! In-memory trie node cache for a state database
//!
//! This crate caches serialized Merkle-Patricia trie nodes, keyed by the
//! 32-byte hash of their content, in front of the persistent key-value store:
//! - Three interchangeable strategies: sharded LRU, fixed-arena ring, and a
//!   two-tier hybrid of both
//! - Shard-parallel locking with xxh3 routing
//! - Versioned, checksummed per-shard snapshots for warm restarts
//! - Aggregated statistics with Prometheus export
//!
//! The cache is an accelerator only. Lookups and writes never fail, and any
//! entry may disappear at any time; callers resolve a miss against the store.

pub mod config;
pub mod errors;
pub mod key;
pub mod manager;
pub mod metrics;
pub mod read_through;
pub mod shard;
pub mod stats;
pub mod storage;
pub mod strategies;
pub mod traits;

pub use config::{CacheType, ConfigLoader, ConfigSource, TrieNodeCacheConfig};
pub use errors::{CacheError, Error, RecoveryHint, Result};
pub use key::{NodeKey, KEY_LEN};
pub use manager::NodeCache;
pub use metrics::CacheMetrics;
pub use read_through::{NodeSource, ReadThrough};
pub use shard::ShardRouter;
pub use stats::StatsSnapshot;
pub use storage::{LoadReport, SaveReport};
pub use strategies::{FastByteCache, HybridCache, ShardedLruCache, Strategy, TierStats};
pub use traits::TrieNodeCache;
