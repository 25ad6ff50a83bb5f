//! Runtime configuration for cache-hierarchy.
//!
//! Configuration can be loaded from a JSON file or constructed programmatically.
//! All tier-related knobs (capacities, TTL sweeps, promotion, prefetch) live here.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// Command-line arguments.
#[derive(Parser, Debug, Clone)]
#[command(name = "cache-hierarchy", about = "Multi-tier cache server")]
pub struct Cli {
    /// Path to configuration file (JSON).
    #[arg(short, long, default_value = "config.json")]
    pub config: PathBuf,

    /// HTTP listen address (overrides the config file).
    #[arg(long)]
    pub listen: Option<String>,

    /// Run without the distributed tier even if the config enables it.
    #[arg(long)]
    pub no_distributed: bool,

    /// Enable verbose logging.
    #[arg(short, long)]
    pub verbose: bool,
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Admin server configuration.
    pub server: ServerConfig,

    /// L1 in-memory tier.
    pub memory: MemoryTierConfig,

    /// L2 on-disk tier.
    pub disk: DiskTierConfig,

    /// L3 distributed tier.
    pub distributed: DistributedTierConfig,

    /// Promotion and prefetch tuning.
    pub coordinator: CoordinatorConfig,

    /// Memoization defaults.
    pub memoize: MemoizeConfig,
}

/// HTTP admin server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Listen address (e.g. "127.0.0.1:8080").
    pub listen: String,

    /// How often the maintenance loop sweeps expired entries, in seconds.
    pub maintenance_interval_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8080".to_string(),
            maintenance_interval_secs: 300,
        }
    }
}

/// L1 limits. Both apply independently.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryTierConfig {
    /// Maximum number of resident entries.
    pub max_entries: usize,

    /// Maximum aggregate payload size in bytes.
    pub max_bytes: usize,
}

impl Default for MemoryTierConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_bytes: 256 * 1024 * 1024, // 256 MB
        }
    }
}

/// L2 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskTierConfig {
    /// Whether the disk tier is part of the hierarchy.
    pub enabled: bool,

    /// Directory holding `.cache` blobs and the metadata index.
    pub cache_dir: PathBuf,

    /// Maximum bytes of compressed blobs tracked by the index.
    pub max_bytes: u64,

    /// Minimum time between two expiry sweeps, in seconds.
    pub cleanup_interval_secs: u64,

    /// zstd compression level.
    pub compression_level: i32,
}

impl Default for DiskTierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cache_dir: PathBuf::from("/tmp/cache-hierarchy"),
            max_bytes: 10 * 1024 * 1024 * 1024, // 10 GB
            cleanup_interval_secs: 3600,
            compression_level: 3,
        }
    }
}

impl DiskTierConfig {
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// L3 settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributedTierConfig {
    /// Whether to attach the distributed tier at all.
    pub enabled: bool,

    /// Redis connection URL.
    pub url: String,

    /// Key prefix; every key is stored as `<namespace>:<key>`.
    pub namespace: String,

    /// Upper bound for a single backend call, in milliseconds.
    pub op_timeout_ms: u64,

    /// Keys deleted per round trip during `clear`.
    pub delete_batch: usize,
}

impl Default for DistributedTierConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: "redis://127.0.0.1:6379".to_string(),
            namespace: "cache-hierarchy".to_string(),
            op_timeout_ms: 250,
            delete_batch: 500,
        }
    }
}

impl DistributedTierConfig {
    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }
}

/// Coordinator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Cumulative accesses before a lower-tier hit is copied upward.
    pub promotion_threshold: u64,

    /// TTL applied to promoted and prefetched copies (None = no expiry).
    pub promotion_ttl_secs: Option<u64>,

    /// Enable background prefetching into L1.
    pub prefetch_enabled: bool,

    /// Maximum number of keys warmed per prefetch round.
    pub max_prefetch: usize,

    /// Number of recently requested keys kept for the prefix heuristic.
    pub recent_keys_window: usize,

    /// Separator used by the shared-prefix heuristic.
    pub prefix_separator: char,

    /// Upper bound on keys tracked by the access-count table.
    pub max_tracked_keys: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            promotion_threshold: 2,
            promotion_ttl_secs: None,
            prefetch_enabled: true,
            max_prefetch: 4,
            recent_keys_window: 256,
            prefix_separator: ':',
            max_tracked_keys: 100_000,
        }
    }
}

impl CoordinatorConfig {
    pub fn promotion_ttl(&self) -> Option<Duration> {
        self.promotion_ttl_secs.map(Duration::from_secs)
    }
}

/// Memoization settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoizeConfig {
    /// TTL for memoized results (None = no expiry).
    pub default_ttl_secs: Option<u64>,
}

impl Default for MemoizeConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: Some(24 * 3600),
        }
    }
}

impl MemoizeConfig {
    pub fn default_ttl(&self) -> Option<Duration> {
        self.default_ttl_secs.map(Duration::from_secs)
    }
}

impl Config {
    /// Load configuration from a JSON file, falling back to defaults for missing fields.
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        let config = if path.exists() {
            let data = std::fs::read_to_string(path)?;
            serde_json::from_str::<Config>(&data)?
        } else {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject bounds that would make a tier unusable.
    pub fn validate(&self) -> Result<(), CacheError> {
        self.memory.validate()?;
        if self.disk.enabled {
            self.disk.validate()?;
        }
        if self.distributed.enabled {
            self.distributed.validate()?;
        }
        self.coordinator.validate()
    }
}

impl MemoryTierConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_entries == 0 {
            return Err(CacheError::config("memory.max_entries must be > 0"));
        }
        if self.max_bytes == 0 {
            return Err(CacheError::config("memory.max_bytes must be > 0"));
        }
        Ok(())
    }
}

impl DiskTierConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.max_bytes == 0 {
            return Err(CacheError::config("disk.max_bytes must be > 0"));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(CacheError::config("disk.cleanup_interval_secs must be > 0"));
        }
        let levels = zstd::compression_level_range();
        if !levels.contains(&self.compression_level) {
            return Err(CacheError::config(format!(
                "disk.compression_level {} outside {:?}",
                self.compression_level, levels
            )));
        }
        Ok(())
    }
}

impl DistributedTierConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.namespace.is_empty() {
            return Err(CacheError::config("distributed.namespace must not be empty"));
        }
        // The namespace is used verbatim in SCAN MATCH patterns.
        if self.namespace.contains(['*', '?', '[', ']', '\\']) {
            return Err(CacheError::config(
                "distributed.namespace must not contain glob characters",
            ));
        }
        if self.op_timeout_ms == 0 {
            return Err(CacheError::config("distributed.op_timeout_ms must be > 0"));
        }
        if self.delete_batch == 0 {
            return Err(CacheError::config("distributed.delete_batch must be > 0"));
        }
        Ok(())
    }
}

impl CoordinatorConfig {
    pub fn validate(&self) -> Result<(), CacheError> {
        if self.promotion_threshold == 0 {
            return Err(CacheError::config("coordinator.promotion_threshold must be >= 1"));
        }
        if self.max_tracked_keys == 0 {
            return Err(CacheError::config("coordinator.max_tracked_keys must be > 0"));
        }
        if self.prefetch_enabled && self.recent_keys_window == 0 {
            return Err(CacheError::config(
                "coordinator.recent_keys_window must be > 0 when prefetch is enabled",
            ));
        }
        Ok(())
    }
}
