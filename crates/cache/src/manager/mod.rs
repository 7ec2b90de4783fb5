//! Cache facade: the single entry point the trie layer holds
//!
//! [`NodeCache`] owns the configured strategy, restores it from the snapshot
//! directory at startup, runs the background stats/checkpoint worker and
//! flushes on close. It is shared by reference (`Arc<NodeCache>`).

mod background;

use crate::config::{CacheType, TrieNodeCacheConfig};
use crate::errors::{CacheError, RecoveryHint, Result};
use crate::key::NodeKey;
use crate::metrics::CacheMetrics;
use crate::stats::StatsSnapshot;
use crate::storage::LoadReport;
use crate::strategies::{Strategy, TierStats};
use crate::traits::TrieNodeCache;
use background::BackgroundWorker;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// State shared between the facade and its background worker
pub(crate) struct CacheInner {
    strategy: Strategy,
    config: TrieNodeCacheConfig,
    /// Serializes saves so a checkpoint and an explicit save never interleave
    save_lock: Mutex<()>,
    latest_stats: RwLock<StatsSnapshot>,
    metrics: Option<CacheMetrics>,
    closed: AtomicBool,
}

impl CacheInner {
    pub(crate) fn refresh_stats(&self) -> StatsSnapshot {
        let stats = self.strategy.update_stats();
        if let Some(metrics) = &self.metrics {
            metrics.observe(&stats);
        }
        *self.latest_stats.write() = stats;
        stats
    }

    fn write_snapshot(&self, dir: &Path, concurrency: usize) -> Result<()> {
        let _guard = self.save_lock.lock();
        self.strategy.save_to_file(dir, concurrency)
    }

    /// Periodic save into the configured snapshot directory. Skipped while
    /// another save is running; failures are logged only.
    pub(crate) fn checkpoint(&self) {
        let Some(dir) = self.config.snapshot_dir.as_deref() else {
            return;
        };
        let Some(_guard) = self.save_lock.try_lock() else {
            debug!("Save already in progress, skipping checkpoint");
            return;
        };
        match self
            .strategy
            .save_to_file(dir, self.config.save_concurrency)
        {
            Ok(()) => debug!(dir = %dir.display(), "Checkpoint complete"),
            Err(e) => warn!(dir = %dir.display(), error = %e, "Checkpoint failed"),
        }
    }
}

/// Configured trie node cache with lifecycle management
pub struct NodeCache {
    inner: Arc<CacheInner>,
    worker: Mutex<Option<BackgroundWorker>>,
    load_report: LoadReport,
}

impl NodeCache {
    /// Build the configured strategy, warm it from `snapshot_dir` and start
    /// background maintenance.
    pub fn open(config: TrieNodeCacheConfig) -> Result<Self> {
        Self::build(config, None)
    }

    /// Like [`NodeCache::open`], additionally feeding `metrics` on every
    /// stats refresh.
    pub fn open_with_metrics(config: TrieNodeCacheConfig, metrics: CacheMetrics) -> Result<Self> {
        Self::build(config, Some(metrics))
    }

    fn build(config: TrieNodeCacheConfig, metrics: Option<CacheMetrics>) -> Result<Self> {
        let strategy = Strategy::from_config(&config)?;

        let load_report = match &config.snapshot_dir {
            Some(dir) => strategy.load_from_dir(dir),
            None => LoadReport::default(),
        };

        info!(
            cache_type = %config.cache_type,
            max_bytes = config.max_bytes,
            shards = config.shard_count,
            restored = load_report.entries_restored,
            "Opened trie node cache"
        );

        let inner = Arc::new(CacheInner {
            strategy,
            config,
            save_lock: Mutex::new(()),
            latest_stats: RwLock::new(StatsSnapshot::default()),
            metrics,
            closed: AtomicBool::new(false),
        });
        inner.refresh_stats();

        let checkpoints = inner
            .config
            .snapshot_dir
            .as_ref()
            .and(inner.config.save_period);
        let stats_interval = inner.config.stats_interval;
        let worker = if stats_interval.is_some() || checkpoints.is_some() {
            Some(BackgroundWorker::spawn(
                Arc::clone(&inner),
                stats_interval,
                checkpoints,
            )?)
        } else {
            None
        };

        Ok(Self {
            inner,
            worker: Mutex::new(worker),
            load_report,
        })
    }

    pub fn config(&self) -> &TrieNodeCacheConfig {
        &self.inner.config
    }

    pub fn cache_type(&self) -> CacheType {
        self.inner.strategy.cache_type()
    }

    pub fn strategy(&self) -> &Strategy {
        &self.inner.strategy
    }

    /// What the startup load restored
    pub fn load_report(&self) -> LoadReport {
        self.load_report
    }

    /// Stats from the last refresh, without recomputing
    pub fn latest_stats(&self) -> StatsSnapshot {
        *self.inner.latest_stats.read()
    }

    /// Per-tier stats when running the hybrid strategy
    pub fn tier_stats(&self) -> Option<TierStats> {
        match &self.inner.strategy {
            Strategy::Hybrid(hybrid) => Some(hybrid.tier_stats()),
            _ => None,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn stop_worker(&self) {
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            worker.stop();
        }
    }
}

impl TrieNodeCache for NodeCache {
    #[inline]
    fn get(&self, key: &NodeKey) -> Option<Bytes> {
        self.inner.strategy.get(key)
    }

    #[inline]
    fn has(&self, key: &NodeKey) -> Option<Bytes> {
        self.inner.strategy.has(key)
    }

    #[inline]
    fn set(&self, key: &NodeKey, value: &[u8]) {
        self.inner.strategy.set(key, value)
    }

    /// Stop the worker, flush to `snapshot_dir` when configured and release
    /// the strategy's memory. A flush error is returned after the memory has
    /// been released. Calling it again is a no-op.
    fn close(&self) -> Result<()> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_worker();

        let flushed = match &self.inner.config.snapshot_dir {
            Some(dir) => self
                .inner
                .write_snapshot(dir, self.inner.config.save_concurrency),
            None => Ok(()),
        };
        if let Err(e) = &flushed {
            warn!(error = %e, "Final snapshot flush failed");
        }

        let released = self.inner.strategy.close();
        info!(
            flushed = flushed.is_ok() && self.inner.config.snapshot_dir.is_some(),
            "Closed trie node cache"
        );
        flushed.and(released)
    }

    fn save_to_file(&self, dir: &Path, concurrency: usize) -> Result<()> {
        if self.is_closed() {
            return Err(CacheError::Closed {
                operation: "save snapshot",
                recovery_hint: RecoveryHint::None,
            });
        }
        self.inner.write_snapshot(dir, concurrency)
    }

    fn update_stats(&self) -> StatsSnapshot {
        self.inner.refresh_stats()
    }
}

impl Drop for NodeCache {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

#[cfg(test)]
mod tests;
