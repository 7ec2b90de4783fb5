//! Cache configuration management with precedence and validation
use crate::errors::{Error, RecoveryHint, Result, SerializationOp};
use crate::strategies::fast::MIN_SHARD_BYTES;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Strategy selector, fixed for the lifetime of a cache instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheType {
    /// Sharded LRU with a soft byte bound
    Lru,
    /// Fixed-arena ring cache with a hard byte bound
    #[default]
    #[serde(alias = "local")]
    Fast,
    /// Fast hot tier in front of an LRU warm tier
    Hybrid,
}

impl FromStr for CacheType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "lru" => Ok(Self::Lru),
            "fast" | "local" => Ok(Self::Fast),
            "hybrid" => Ok(Self::Hybrid),
            other => Err(Error::Configuration {
                message: format!("Unknown cache type: {other}"),
                recovery_hint: RecoveryHint::UseDefault {
                    value: "fast".to_string(),
                },
            }),
        }
    }
}

impl fmt::Display for CacheType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lru => "lru",
            Self::Fast => "fast",
            Self::Hybrid => "hybrid",
        })
    }
}

/// Construction-time configuration of a trie node cache
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrieNodeCacheConfig {
    /// Eviction strategy
    pub cache_type: CacheType,
    /// Total byte budget across all shards and tiers
    pub max_bytes: u64,
    /// Optional item budget, honoured by LRU shards only
    pub max_items: Option<u64>,
    /// Number of independently locked shards
    pub shard_count: usize,
    /// Hot tier budget of the hybrid strategy; defaults to 1/16 of `max_bytes`
    pub hot_tier_bytes: Option<u64>,
    /// Directory loaded at startup and flushed to on close
    pub snapshot_dir: Option<PathBuf>,
    /// Parallel workers used by every save
    pub save_concurrency: usize,
    /// Period of background checkpoints into `snapshot_dir`
    #[serde(with = "duration_secs")]
    pub save_period: Option<Duration>,
    /// Period of the background stats refresh
    #[serde(with = "duration_secs")]
    pub stats_interval: Option<Duration>,
}

impl Default for TrieNodeCacheConfig {
    fn default() -> Self {
        Self {
            cache_type: CacheType::Fast,
            max_bytes: 512 * 1024 * 1024, // 512MiB
            max_items: None,
            shard_count: 64,
            hot_tier_bytes: None,
            snapshot_dir: None,
            save_concurrency: 4,
            save_period: None,
            stats_interval: Some(Duration::from_secs(10)),
        }
    }
}

impl TrieNodeCacheConfig {
    pub fn builder() -> TrieNodeCacheConfigBuilder {
        TrieNodeCacheConfigBuilder::new()
    }

    /// Hot tier budget after applying the 1/16 default
    pub fn resolved_hot_tier_bytes(&self) -> u64 {
        self.hot_tier_bytes.unwrap_or(self.max_bytes / 16)
    }

    /// Reject configurations no strategy can be built from
    pub fn validate(&self) -> Result<()> {
        if self.max_bytes == 0 {
            return Err(invalid("max_bytes must be positive", "536870912"));
        }
        if self.shard_count == 0 {
            return Err(invalid("shard_count must be positive", "64"));
        }
        if self.save_concurrency == 0 {
            return Err(invalid("save_concurrency must be positive", "4"));
        }
        if self.max_items == Some(0) {
            return Err(invalid("max_items must be positive when set", "unbounded"));
        }
        if self.save_period == Some(Duration::ZERO) || self.stats_interval == Some(Duration::ZERO) {
            return Err(invalid("background periods must be positive when set", "unset"));
        }

        match self.cache_type {
            CacheType::Lru => {}
            CacheType::Fast => {
                let shard_bytes = self.max_bytes / self.shard_count as u64;
                if shard_bytes < MIN_SHARD_BYTES {
                    return Err(Error::Configuration {
                        message: format!(
                            "fast cache shards need at least {MIN_SHARD_BYTES} bytes each, got {shard_bytes}"
                        ),
                        recovery_hint: RecoveryHint::Manual {
                            instructions: "Raise max_bytes or lower shard_count".to_string(),
                        },
                    });
                }
            }
            CacheType::Hybrid => {
                let hot = self.resolved_hot_tier_bytes();
                if hot >= self.max_bytes {
                    return Err(Error::Configuration {
                        message: format!(
                            "hot tier ({hot} bytes) must be smaller than max_bytes ({})",
                            self.max_bytes
                        ),
                        recovery_hint: RecoveryHint::UseDefault {
                            value: "max_bytes / 16".to_string(),
                        },
                    });
                }
                if hot < MIN_SHARD_BYTES {
                    return Err(Error::Configuration {
                        message: format!(
                            "hot tier needs at least {MIN_SHARD_BYTES} bytes, got {hot}"
                        ),
                        recovery_hint: RecoveryHint::Manual {
                            instructions: "Raise hot_tier_bytes or max_bytes".to_string(),
                        },
                    });
                }
            }
        }
        Ok(())
    }
}

fn invalid(message: &str, default: &str) -> Error {
    Error::Configuration {
        message: message.to_string(),
        recovery_hint: RecoveryHint::UseDefault {
            value: default.to_string(),
        },
    }
}

/// Whole seconds on the wire, `null` for unset
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        value.map(|d| d.as_secs()).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_secs))
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Default configuration
    Default,
    /// Configuration file
    ConfigFile(PathBuf),
    /// Environment variable
    EnvironmentVariable(String),
}

/// Builder for creating cache configurations
pub struct TrieNodeCacheConfigBuilder {
    config: TrieNodeCacheConfig,
}

impl TrieNodeCacheConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: TrieNodeCacheConfig::default(),
        }
    }

    pub fn with_cache_type(mut self, cache_type: CacheType) -> Self {
        self.config.cache_type = cache_type;
        self
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.config.max_bytes = max_bytes;
        self
    }

    pub fn with_max_items(mut self, max_items: u64) -> Self {
        self.config.max_items = Some(max_items);
        self
    }

    pub fn with_shard_count(mut self, shard_count: usize) -> Self {
        self.config.shard_count = shard_count;
        self
    }

    pub fn with_hot_tier_bytes(mut self, hot_tier_bytes: u64) -> Self {
        self.config.hot_tier_bytes = Some(hot_tier_bytes);
        self
    }

    pub fn with_snapshot_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.snapshot_dir = Some(dir.into());
        self
    }

    pub fn with_save_concurrency(mut self, concurrency: usize) -> Self {
        self.config.save_concurrency = concurrency;
        self
    }

    pub fn with_save_period(mut self, period: Duration) -> Self {
        self.config.save_period = Some(period);
        self
    }

    /// Set or disable (`None`) the background stats refresh
    pub fn with_stats_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.stats_interval = interval;
        self
    }

    /// Build and validate the configuration
    pub fn build(self) -> Result<TrieNodeCacheConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for TrieNodeCacheConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

pub const ENV_CACHE_TYPE: &str = "TRIENODE_CACHE_TYPE";
pub const ENV_MAX_BYTES: &str = "TRIENODE_CACHE_MAX_BYTES";
pub const ENV_SHARDS: &str = "TRIENODE_CACHE_SHARDS";
pub const ENV_SNAPSHOT_DIR: &str = "TRIENODE_CACHE_SNAPSHOT_DIR";
pub const ENV_SAVE_CONCURRENCY: &str = "TRIENODE_CACHE_SAVE_CONCURRENCY";
pub const ENV_SAVE_PERIOD_SECS: &str = "TRIENODE_CACHE_SAVE_PERIOD_SECS";

/// Configuration loader that handles precedence
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration: defaults, then the `cache` object of the JSON file
    /// at `path` (if it exists), then `TRIENODE_CACHE_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<(TrieNodeCacheConfig, ConfigSource)> {
        let mut config = TrieNodeCacheConfig::default();
        let mut source = ConfigSource::Default;

        if let Some(path) = path {
            if let Some(file_config) = Self::load_from_config_file(path)? {
                config = file_config;
                source = ConfigSource::ConfigFile(path.to_path_buf());
            }
        }

        if Self::apply_env(&mut config, |name| std::env::var(name).ok())? {
            source = ConfigSource::EnvironmentVariable("TRIENODE_CACHE_*".to_string());
        }

        config.validate()?;
        tracing::debug!(?source, cache_type = %config.cache_type, "Loaded trie node cache config");
        Ok((config, source))
    }

    /// Load configuration from config file
    fn load_from_config_file(path: &Path) -> Result<Option<TrieNodeCacheConfig>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|e| Error::Io {
            path: path.to_path_buf(),
            operation: "read config file",
            source: e,
            recovery_hint: RecoveryHint::CheckPermissions {
                path: path.to_path_buf(),
            },
        })?;

        let decode_error = |e: serde_json::Error| Error::Serialization {
            key: path.display().to_string(),
            operation: SerializationOp::Decode,
            source: Box::new(e),
            recovery_hint: RecoveryHint::Manual {
                instructions: "Check config file syntax".to_string(),
            },
        };

        let file_config: serde_json::Value = serde_json::from_str(&content).map_err(decode_error)?;
        match file_config.get("cache") {
            Some(cache_obj) => Ok(Some(
                serde_json::from_value(cache_obj.clone()).map_err(decode_error)?,
            )),
            None => Ok(Some(TrieNodeCacheConfig::default())),
        }
    }

    /// Override fields from environment variables; returns whether any applied
    fn apply_env<F>(config: &mut TrieNodeCacheConfig, lookup: F) -> Result<bool>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut has_env_config = false;

        if let Some(value) = lookup(ENV_CACHE_TYPE) {
            config.cache_type = value.parse()?;
            has_env_config = true;
        }
        if let Some(value) = lookup(ENV_MAX_BYTES) {
            config.max_bytes = parse_env(ENV_MAX_BYTES, &value)?;
            has_env_config = true;
        }
        if let Some(value) = lookup(ENV_SHARDS) {
            config.shard_count = parse_env(ENV_SHARDS, &value)?;
            has_env_config = true;
        }
        if let Some(value) = lookup(ENV_SNAPSHOT_DIR) {
            config.snapshot_dir = Some(PathBuf::from(value));
            has_env_config = true;
        }
        if let Some(value) = lookup(ENV_SAVE_CONCURRENCY) {
            config.save_concurrency = parse_env(ENV_SAVE_CONCURRENCY, &value)?;
            has_env_config = true;
        }
        if let Some(value) = lookup(ENV_SAVE_PERIOD_SECS) {
            let secs: u64 = parse_env(ENV_SAVE_PERIOD_SECS, &value)?;
            config.save_period = (secs > 0).then(|| Duration::from_secs(secs));
            has_env_config = true;
        }

        Ok(has_env_config)
    }
}

fn parse_env<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| Error::Configuration {
        message: format!("{name}={value} is not a valid number"),
        recovery_hint: RecoveryHint::Manual {
            instructions: format!("Unset {name} or give it a non-negative integer"),
        },
    })
}
