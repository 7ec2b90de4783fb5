//! Eviction strategies and the factory that selects one from configuration

pub mod fast;
pub mod hybrid;
pub mod lru;

pub use fast::FastByteCache;
pub use hybrid::{HybridCache, TierStats};
pub use lru::ShardedLruCache;

use crate::config::{CacheType, TrieNodeCacheConfig};
use crate::errors::Result;
use crate::key::NodeKey;
use crate::stats::StatsSnapshot;
use crate::storage::LoadReport;
use crate::traits::TrieNodeCache;
use bytes::Bytes;
use std::path::Path;

/// The strategy a cache instance was built with
pub enum Strategy {
    Lru(ShardedLruCache),
    Fast(FastByteCache),
    Hybrid(HybridCache),
}

impl Strategy {
    /// Build the strategy named by `config.cache_type`
    pub fn from_config(config: &TrieNodeCacheConfig) -> Result<Self> {
        config.validate()?;
        match config.cache_type {
            CacheType::Lru => Ok(Self::Lru(ShardedLruCache::new(
                config.max_bytes,
                config.max_items,
                config.shard_count,
            )?)),
            CacheType::Fast => Ok(Self::Fast(FastByteCache::new(
                config.max_bytes,
                config.shard_count,
            )?)),
            CacheType::Hybrid => {
                let hot = config.resolved_hot_tier_bytes();
                Ok(Self::Hybrid(HybridCache::new(
                    hot,
                    config.max_bytes - hot,
                    config.max_items,
                    config.shard_count,
                )?))
            }
        }
    }

    pub fn cache_type(&self) -> CacheType {
        match self {
            Self::Lru(_) => CacheType::Lru,
            Self::Fast(_) => CacheType::Fast,
            Self::Hybrid(_) => CacheType::Hybrid,
        }
    }

    /// Restore from a snapshot directory written by the same strategy
    pub fn load_from_dir(&self, dir: &Path) -> LoadReport {
        match self {
            Self::Lru(cache) => cache.load_from_dir(dir),
            Self::Fast(cache) => cache.load_from_dir(dir),
            Self::Hybrid(cache) => cache.load_from_dir(dir),
        }
    }

    fn as_cache(&self) -> &dyn TrieNodeCache {
        match self {
            Self::Lru(cache) => cache,
            Self::Fast(cache) => cache,
            Self::Hybrid(cache) => cache,
        }
    }
}

impl TrieNodeCache for Strategy {
    #[inline]
    fn get(&self, key: &NodeKey) -> Option<Bytes> {
        self.as_cache().get(key)
    }

    #[inline]
    fn has(&self, key: &NodeKey) -> Option<Bytes> {
        self.as_cache().has(key)
    }

    #[inline]
    fn set(&self, key: &NodeKey, value: &[u8]) {
        self.as_cache().set(key, value)
    }

    fn close(&self) -> Result<()> {
        self.as_cache().close()
    }

    fn save_to_file(&self, dir: &Path, concurrency: usize) -> Result<()> {
        self.as_cache().save_to_file(dir, concurrency)
    }

    fn update_stats(&self) -> StatsSnapshot {
        self.as_cache().update_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(cache_type: CacheType) -> TrieNodeCacheConfig {
        TrieNodeCacheConfig::builder()
            .with_cache_type(cache_type)
            .with_max_bytes(4 << 20)
            .with_shard_count(8)
            .build()
            .unwrap()
    }

    #[test]
    fn test_factory_builds_each_strategy() {
        for cache_type in [CacheType::Lru, CacheType::Fast, CacheType::Hybrid] {
            let strategy = Strategy::from_config(&config(cache_type)).unwrap();
            assert_eq!(strategy.cache_type(), cache_type);

            let key = NodeKey::new([7; 32]);
            strategy.set(&key, b"branch");
            assert_eq!(strategy.get(&key).as_deref(), Some(&b"branch"[..]));
            assert_eq!(strategy.has(&key), strategy.get(&key));
            assert!(strategy.update_stats().capacity_bytes <= 4 << 20);
        }
    }

    #[test]
    fn test_factory_rejects_invalid_config() {
        let mut bad = config(CacheType::Lru);
        bad.shard_count = 0;
        assert!(Strategy::from_config(&bad).is_err());
    }

    #[test]
    fn test_hybrid_splits_budget() {
        let strategy = Strategy::from_config(&config(CacheType::Hybrid)).unwrap();
        let Strategy::Hybrid(hybrid) = &strategy else {
            panic!("expected hybrid strategy");
        };
        assert_eq!(hybrid.hot().capacity_bytes(), (4 << 20) / 16);
        assert!(hybrid.warm().capacity_bytes() <= (4 << 20) - (4 << 20) / 16);
    }
}
