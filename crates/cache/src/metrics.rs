//! Prometheus export of cache statistics

use crate::errors::{CacheError, RecoveryHint, Result, SerializationOp};
use crate::stats::StatsSnapshot;
use prometheus::{Encoder, Gauge, IntGaugeVec, Opts, Registry, TextEncoder};

/// Gauges mirroring the latest [`StatsSnapshot`] of one cache instance.
///
/// Counters are exported as gauges because the snapshot already carries
/// cumulative totals; the exporter only copies them.
#[derive(Clone)]
pub struct CacheMetrics {
    registry: Registry,
    stats: IntGaugeVec,
    hit_ratio: Gauge,
}

fn registration_error(e: prometheus::Error) -> CacheError {
    CacheError::Configuration {
        message: format!("Failed to initialize metrics: {e}"),
        recovery_hint: RecoveryHint::Manual {
            instructions: "Use a distinct cache name per registry".to_string(),
        },
    }
}

impl CacheMetrics {
    /// Register the collectors for the cache called `cache_name`
    pub fn register(registry: &Registry, cache_name: &str) -> Result<Self> {
        let stats = IntGaugeVec::new(
            Opts::new("trienode_cache_stats", "Trie node cache statistics")
                .const_label("cache", cache_name),
            &["metric"],
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(stats.clone()))
            .map_err(registration_error)?;

        let hit_ratio = Gauge::with_opts(
            Opts::new(
                "trienode_cache_hit_ratio",
                "Share of lookups served from the cache",
            )
            .const_label("cache", cache_name),
        )
        .map_err(registration_error)?;
        registry
            .register(Box::new(hit_ratio.clone()))
            .map_err(registration_error)?;

        Ok(Self {
            registry: registry.clone(),
            stats,
            hit_ratio,
        })
    }

    /// Copy a snapshot into the gauges
    pub fn observe(&self, snapshot: &StatsSnapshot) {
        let values = [
            ("gets", snapshot.gets),
            ("hits", snapshot.hits),
            ("misses", snapshot.misses),
            ("sets", snapshot.sets),
            ("evictions", snapshot.evictions),
            ("items", snapshot.items),
            ("memory_bytes", snapshot.memory_bytes),
            ("capacity_bytes", snapshot.capacity_bytes),
        ];
        for (metric, value) in values {
            self.stats
                .with_label_values(&[metric])
                .set(i64::try_from(value).unwrap_or(i64::MAX));
        }
        self.hit_ratio.set(snapshot.hit_ratio());
    }

    /// Render the whole registry in the text exposition format
    pub fn encode_text(&self) -> Result<String> {
        let encode_error = |source: Box<dyn std::error::Error + Send + Sync>| {
            CacheError::Serialization {
                key: "prometheus registry".to_string(),
                operation: SerializationOp::Encode,
                source,
                recovery_hint: RecoveryHint::None,
            }
        };

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| encode_error(Box::new(e)))?;
        String::from_utf8(buffer).map_err(|e| encode_error(Box::new(e)))
    }
}
