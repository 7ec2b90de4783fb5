//! Shared helpers for trie node cache integration tests

#![allow(dead_code)]

use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Once;
use trienode_cache::{CacheType, NodeCache, NodeKey, TrieNodeCacheConfig};

static TRACING: Once = Once::new();

/// Install a test subscriber honouring `RUST_LOG`, once per process
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// Content-addressed key of `value`
pub fn key_of(value: &[u8]) -> NodeKey {
    NodeKey::new(Sha256::digest(value).into())
}

/// Key number `n` of a deterministic key space
pub fn nth_key(n: u64) -> NodeKey {
    key_of(&n.to_le_bytes())
}

/// Node payload derived from the key, 1..=`max_len` bytes long
pub fn node_for(key: &NodeKey, max_len: usize) -> Vec<u8> {
    let bytes = key.as_bytes();
    let len = 1 + (bytes[0] as usize * 256 + bytes[1] as usize) % max_len;
    bytes.iter().copied().cycle().take(len).collect()
}

/// Builder for caches used by the integration suites
pub struct TestCacheBuilder {
    config: TrieNodeCacheConfig,
}

impl TestCacheBuilder {
    pub fn new(cache_type: CacheType) -> Self {
        Self {
            config: TrieNodeCacheConfig {
                cache_type,
                stats_interval: None,
                ..TrieNodeCacheConfig::default()
            },
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.config.max_bytes = max_bytes;
        self
    }

    pub fn with_hot_tier_bytes(mut self, hot: u64) -> Self {
        self.config.hot_tier_bytes = Some(hot);
        self
    }

    pub fn with_shard_count(mut self, shards: usize) -> Self {
        self.config.shard_count = shards;
        self
    }

    pub fn with_snapshot_dir(mut self, dir: &Path) -> Self {
        self.config.snapshot_dir = Some(dir.to_path_buf());
        self
    }

    pub fn config(&self) -> &TrieNodeCacheConfig {
        &self.config
    }

    pub fn build(self) -> NodeCache {
        init_tracing();
        NodeCache::open(self.config).expect("test cache config must be valid")
    }
}
