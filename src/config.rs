//! Configuration Module
//!
//! Handles loading and validating cache configuration from environment variables.

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::cache::{Compression, EvictionPolicy, DEFAULT_SHARD_COUNT, DEFAULT_SIZE_LIMIT};
use crate::error::{CacheError, Result};

/// Base directory used when `SHARD_CACHE_ROOT` is not set.
pub const DEFAULT_ROOT: &str = "data-unversioned/cache";

/// Cache configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory that holds the shard subdirectories
    pub root_directory: PathBuf,
    /// Number of independent shards; fixed for the lifetime of the directory
    pub shard_count: usize,
    /// Global budget for stored bytes across all shards
    pub size_limit_bytes: u64,
    /// Maximum wait for a shard's mutation lock
    pub lock_timeout: Duration,
    /// Minimum raw value size that triggers compression
    pub compression_threshold_bytes: usize,
    /// Compressor applied to values at or above the threshold
    pub compression: Compression,
    /// Order in which entries are evicted
    pub eviction_policy: EvictionPolicy,
    /// Expiry applied by `put` when no explicit TTL is given
    pub default_ttl: Option<Duration>,
    /// Interval of the background expiry task
    pub sweep_interval: Duration,
}

impl Config {
    /// Creates a default configuration rooted at `root_directory`.
    pub fn new(root_directory: impl Into<PathBuf>) -> Self {
        Self {
            root_directory: root_directory.into(),
            ..Self::default()
        }
    }

    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `SHARD_CACHE_ROOT` - Root directory (default: `data-unversioned/cache`)
    /// - `SHARD_CACHE_SHARDS` - Shard count (default: 64)
    /// - `SHARD_CACHE_SIZE_LIMIT` - Size budget in bytes (default: 3e11)
    /// - `SHARD_CACHE_LOCK_TIMEOUT_MS` - Lock timeout in milliseconds (default: 1000)
    /// - `SHARD_CACHE_COMPRESSION_THRESHOLD` - Compression threshold in bytes (default: 1024)
    /// - `SHARD_CACHE_COMPRESSION` - `gzip`, `zstd` or `none`, optionally `:<level>` (default: `gzip:1`)
    /// - `SHARD_CACHE_EVICTION` - `least-recently-stored` or `least-recently-used`
    /// - `SHARD_CACHE_DEFAULT_TTL` - Default TTL in seconds (default: none)
    /// - `SHARD_CACHE_SWEEP_INTERVAL` - Expiry sweep interval in seconds (default: 60)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            root_directory: env::var("SHARD_CACHE_ROOT")
                .map(PathBuf::from)
                .unwrap_or(defaults.root_directory),
            shard_count: env_or("SHARD_CACHE_SHARDS", defaults.shard_count),
            size_limit_bytes: env_or("SHARD_CACHE_SIZE_LIMIT", defaults.size_limit_bytes),
            lock_timeout: env::var("SHARD_CACHE_LOCK_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_timeout),
            compression_threshold_bytes: env_or(
                "SHARD_CACHE_COMPRESSION_THRESHOLD",
                defaults.compression_threshold_bytes,
            ),
            compression: env_or("SHARD_CACHE_COMPRESSION", defaults.compression),
            eviction_policy: env_or("SHARD_CACHE_EVICTION", defaults.eviction_policy),
            default_ttl: env::var("SHARD_CACHE_DEFAULT_TTL")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
            sweep_interval: env::var("SHARD_CACHE_SWEEP_INTERVAL")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.sweep_interval),
        }
    }

    /// Returns a copy of this configuration rooted at `<root>/<scope>`.
    ///
    /// Each scope is an independent cache with its own shards and budget.
    pub fn for_scope(&self, scope: &str) -> Self {
        Self {
            root_directory: self.root_directory.join(scope),
            ..self.clone()
        }
    }

    // == Validate ==
    /// Rejects configurations the cache cannot operate with.
    pub fn validate(&self) -> Result<()> {
        if self.shard_count == 0 {
            return Err(CacheError::InvalidConfig(
                "shard_count must be at least 1".to_string(),
            ));
        }
        if self.size_limit_bytes == 0 {
            return Err(CacheError::InvalidConfig(
                "size_limit_bytes must be greater than 0".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(CacheError::InvalidConfig(
                "lock_timeout must be greater than 0".to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(CacheError::InvalidConfig(
                "sweep_interval must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root_directory: PathBuf::from(DEFAULT_ROOT),
            shard_count: DEFAULT_SHARD_COUNT,
            size_limit_bytes: DEFAULT_SIZE_LIMIT,
            lock_timeout: Duration::from_secs(1),
            compression_threshold_bytes: 1024,
            compression: Compression::Gzip { level: 1 },
            eviction_policy: EvictionPolicy::LeastRecentlyStored,
            default_ttl: None,
            sweep_interval: Duration::from_secs(60),
        }
    }
}

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
