//! Background maintenance thread of the cache facade

use super::CacheInner;
use crate::errors::{CacheError, RecoveryHint, Result};
use crossbeam::channel::{self, Receiver, Sender};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Periodic stats refresh and checkpointing, stopped by dropping the
/// shutdown sender
pub(crate) struct BackgroundWorker {
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundWorker {
    pub(crate) fn spawn(
        inner: Arc<CacheInner>,
        stats_interval: Option<Duration>,
        save_period: Option<Duration>,
    ) -> Result<Self> {
        let (shutdown_tx, shutdown_rx) = channel::bounded::<()>(0);

        let handle = std::thread::Builder::new()
            .name("trienode-cache-maint".to_string())
            .spawn(move || run(&inner, &shutdown_rx, stats_interval, save_period))
            .map_err(|e| CacheError::Io {
                path: PathBuf::new(),
                operation: "spawn maintenance thread",
                source: e,
                recovery_hint: RecoveryHint::Retry {
                    after: Duration::from_secs(1),
                },
            })?;

        Ok(Self {
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Signal the thread and wait for it; an in-flight checkpoint finishes first
    pub(crate) fn stop(mut self) {
        self.shutdown_and_join();
    }

    fn shutdown_and_join(&mut self) {
        drop(self.shutdown.take());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Cache maintenance thread panicked");
            }
        }
    }
}

impl Drop for BackgroundWorker {
    fn drop(&mut self) {
        self.shutdown_and_join();
    }
}

fn ticker(period: Option<Duration>) -> Receiver<Instant> {
    match period {
        Some(period) => channel::tick(period),
        None => channel::never(),
    }
}

fn run(
    inner: &CacheInner,
    shutdown: &Receiver<()>,
    stats_interval: Option<Duration>,
    save_period: Option<Duration>,
) {
    let stats_tick = ticker(stats_interval);
    let save_tick = ticker(save_period);
    tracing::debug!(?stats_interval, ?save_period, "Cache maintenance started");

    loop {
        channel::select! {
            recv(shutdown) -> _ => break,
            recv(stats_tick) -> _ => {
                let stats = inner.refresh_stats();
                tracing::trace!(
                    hits = stats.hits,
                    misses = stats.misses,
                    items = stats.items,
                    "Refreshed cache stats"
                );
            }
            recv(save_tick) -> _ => inner.checkpoint(),
        }
    }

    tracing::debug!("Cache maintenance stopped");
}
