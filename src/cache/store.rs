//! Cache Store Module
//!
//! The public entry point. `DiskCache` routes each key to a shard, runs the
//! shard operation and enforces the global size limit after every store.

use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::cache::codec::{Codec, ThresholdCodec};
use crate::cache::entry::{current_timestamp_ms, EntryMeta};
use crate::cache::eviction::EvictionManager;
use crate::cache::key::{CacheKey, EncodedKey};
use crate::cache::recency::SequenceClock;
use crate::cache::router::ShardRouter;
use crate::cache::shard::{Shard, ShardOptions};
use crate::cache::stats::{CacheStats, StatsRecorder};
use crate::config::Config;
use crate::error::{CacheError, Result};

/// Layout descriptor written at the cache root
pub const LAYOUT_FILE: &str = "cache.json";

/// Bumped whenever key serialization, hashing or the entry format changes
pub const LAYOUT_VERSION: u32 = 1;

const KEY_SCHEME: &str = "bincode1-xxh3";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Layout {
    format_version: u32,
    shard_count: usize,
    key_scheme: String,
}

// == Entry Info ==
/// A resident entry as reported by [`DiskCache::entries`].
#[derive(Debug, Clone)]
pub struct EntryInfo {
    pub shard: usize,
    /// `None` when the stored key bytes no longer decode (older key type)
    pub key: Option<CacheKey>,
    pub meta: EntryMeta,
}

// == Disk Cache ==
/// Sharded, size-bounded, compressing disk cache.
///
/// Create one per scope at startup and share it by reference (or `Arc`)
/// among workers; all operations take `&self`.
#[derive(Debug)]
pub struct DiskCache {
    config: Config,
    router: ShardRouter,
    shards: Vec<Shard>,
    eviction: EvictionManager,
    stats: StatsRecorder,
}

impl DiskCache {
    // == Constructor ==
    /// Opens (or creates) the cache described by `config`.
    pub fn open(config: Config) -> Result<Self> {
        let codec = Arc::new(ThresholdCodec::new(
            config.compression,
            config.compression_threshold_bytes,
        ));
        Self::with_codec(config, codec)
    }

    /// Opens the cache with a caller-supplied codec.
    pub fn with_codec(config: Config, codec: Arc<dyn Codec>) -> Result<Self> {
        config.validate()?;
        let root = &config.root_directory;
        fs::create_dir_all(root).map_err(|e| CacheError::io(root, e))?;
        check_layout(root, config.shard_count)?;

        let clock = Arc::new(SequenceClock::new());
        let options = ShardOptions {
            lock_timeout: config.lock_timeout,
            touch_on_hit: config.eviction_policy.touches_on_hit(),
        };
        let shards = (0..config.shard_count)
            .map(|i| {
                Shard::open(
                    i,
                    root.join(format!("{i:03}")),
                    codec.clone(),
                    clock.clone(),
                    options.clone(),
                )
            })
            .collect::<Result<Vec<_>>>()?;

        let cache = Self {
            router: ShardRouter::new(config.shard_count),
            eviction: EvictionManager::new(config.size_limit_bytes),
            stats: StatsRecorder::new(),
            shards,
            config,
        };
        info!(
            root = %cache.config.root_directory.display(),
            shards = cache.shards.len(),
            entries = cache.len(),
            bytes = cache.total_size(),
            limit = cache.config.size_limit_bytes,
            "cache opened"
        );

        // A smaller limit than the one the directory was filled under takes effect now.
        let report = cache.track(cache.eviction.enforce(&cache.shards, None))?;
        cache.stats.record_evictions(report.entries, report.bytes);
        Ok(cache)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Shard index `key` routes to.
    pub fn route(&self, key: &CacheKey) -> Result<usize> {
        Ok(self.router.route(&key.encode()?))
    }

    // == Get ==
    /// Returns the value stored under `key`, or `None` on a miss.
    ///
    /// Corrupt entries are logged, discarded and reported as misses.
    pub fn get(&self, key: &CacheKey) -> Result<Option<Vec<u8>>> {
        let encoded = key.encode()?;
        let shard = self.shard_for(&encoded);

        match shard.fetch(&encoded) {
            Ok(Some(value)) => {
                self.stats.record_hit();
                Ok(Some(value))
            }
            Ok(None) => {
                self.stats.record_miss();
                Ok(None)
            }
            Err(CacheError::CorruptEntry { shard: index, reason }) => {
                warn!(shard = index, key = %key, %reason, "discarding corrupt entry");
                self.stats.record_corrupt();
                self.stats.record_miss();
                if let Err(e) = self.track(shard.remove(&encoded)) {
                    debug!(shard = index, error = %e, "corrupt entry left for a later pass");
                }
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    // == Put ==
    /// Stores `value` under `key`, replacing any prior value, then evicts
    /// until the cache is within its size limit.
    ///
    /// Uses the configured default TTL, if any.
    pub fn put(&self, key: &CacheKey, value: &[u8]) -> Result<()> {
        let expires_at = self
            .config
            .default_ttl
            .map(|ttl| current_timestamp_ms().saturating_add(ttl.as_millis() as u64));
        self.put_inner(key, value, expires_at)
    }

    /// Stores `value` under `key`; the entry becomes a miss after `ttl`.
    pub fn put_with_ttl(&self, key: &CacheKey, value: &[u8], ttl: Duration) -> Result<()> {
        let expires_at = current_timestamp_ms().saturating_add(ttl.as_millis() as u64);
        self.put_inner(key, value, Some(expires_at))
    }

    fn put_inner(&self, key: &CacheKey, value: &[u8], expires_at: Option<u64>) -> Result<()> {
        let encoded = key.encode()?;
        let index = self.router.route(&encoded);

        self.track(self.shards[index].store(&encoded, value, expires_at))?;
        self.stats.record_store();

        let report = self
            .track(self.eviction.enforce(&self.shards, Some((index, encoded.digest()))))?;
        self.stats.record_evictions(report.entries, report.bytes);
        Ok(())
    }

    // == Remove ==
    /// Deletes the entry for `key`. Returns whether one was resident.
    pub fn remove(&self, key: &CacheKey) -> Result<bool> {
        let encoded = key.encode()?;
        self.track(self.shard_for(&encoded).remove(&encoded))
    }

    // == Typed Values ==
    /// Like [`DiskCache::get`], deserializing the stored bytes with bincode.
    ///
    /// A value that no longer deserializes (for example after a type change)
    /// is treated as a miss.
    pub fn get_value<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        let Some(bytes) = self.get(key)? else {
            return Ok(None);
        };
        match bincode::deserialize(&bytes) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!(key = %key, error = %e, "cached value does not deserialize; treating as miss");
                Ok(None)
            }
        }
    }

    /// Serializes `value` with bincode and stores it under `key`.
    pub fn put_value<T: Serialize + ?Sized>(&self, key: &CacheKey, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.put(key, &bytes)
    }

    // == Memoization ==
    /// Returns the cached bytes for `key`, or computes, stores and returns them.
    ///
    /// Cache failures never fail the call: they are logged and the value is
    /// recomputed or simply not stored.
    pub fn get_or_compute<F>(&self, key: &CacheKey, compute: F) -> Vec<u8>
    where
        F: FnOnce() -> Vec<u8>,
    {
        match self.get(key) {
            Ok(Some(value)) => return value,
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cache read failed; recomputing"),
        }
        let value = compute();
        if let Err(e) = self.put(key, &value) {
            warn!(key = %key, error = %e, "cache write failed; value not cached");
        }
        value
    }

    /// Typed counterpart of [`DiskCache::get_or_compute`].
    pub fn get_or_compute_value<T, F>(&self, key: &CacheKey, compute: F) -> T
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> T,
    {
        match self.get_value(key) {
            Ok(Some(value)) => return value,
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cache read failed; recomputing"),
        }
        let value = compute();
        if let Err(e) = self.put_value(key, &value) {
            warn!(key = %key, error = %e, "cache write failed; value not cached");
        }
        value
    }

    // == Maintenance ==
    /// Removes every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let mut removed = 0;
        for shard in &self.shards {
            removed += self.track(shard.clear())?;
        }
        info!(removed, "cache cleared");
        Ok(removed)
    }

    /// Removes expired entries from every shard. Returns how many were removed.
    pub fn expire(&self) -> Result<usize> {
        let now = current_timestamp_ms();
        let mut removed = 0;
        for shard in &self.shards {
            removed += self.track(shard.expire(now))?;
        }
        Ok(removed)
    }

    /// Snapshot of all resident entries, grouped by shard, oldest first within each.
    pub fn entries(&self) -> Vec<EntryInfo> {
        self.shards
            .iter()
            .flat_map(|shard| {
                shard.entries().into_iter().map(move |meta| EntryInfo {
                    shard: shard.index(),
                    key: CacheKey::decode(&meta.key).ok(),
                    meta,
                })
            })
            .collect()
    }

    // == Size ==
    /// Stored bytes across all shards.
    pub fn total_size(&self) -> u64 {
        EvictionManager::total_size(&self.shards)
    }

    pub fn size_limit(&self) -> u64 {
        self.eviction.size_limit()
    }

    pub fn len(&self) -> usize {
        self.shards.iter().map(Shard::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(Shard::is_empty)
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.len(), self.total_size())
    }

    fn shard_for(&self, key: &EncodedKey) -> &Shard {
        &self.shards[self.router.route(key)]
    }

    fn track<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(CacheError::LockTimeout { .. }) = &result {
            self.stats.record_lock_timeout();
        }
        result
    }
}

fn check_layout(root: &Path, shard_count: usize) -> Result<()> {
    let path = root.join(LAYOUT_FILE);
    let expected = Layout {
        format_version: LAYOUT_VERSION,
        shard_count,
        key_scheme: KEY_SCHEME.to_string(),
    };

    match fs::read(&path) {
        Ok(bytes) => {
            let found: Layout = serde_json::from_slice(&bytes).map_err(|e| {
                CacheError::InvalidConfig(format!("unreadable {}: {e}", path.display()))
            })?;
            if found.shard_count != shard_count {
                return Err(CacheError::InvalidConfig(format!(
                    "{} was created with {} shards, configured {}",
                    root.display(),
                    found.shard_count,
                    shard_count
                )));
            }
            if found != expected {
                return Err(CacheError::InvalidConfig(format!(
                    "{} uses format {} ({}), expected {} ({})",
                    root.display(),
                    found.format_version,
                    found.key_scheme,
                    LAYOUT_VERSION,
                    KEY_SCHEME
                )));
            }
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            let json = serde_json::to_vec_pretty(&expected)
                .map_err(|e| CacheError::Serialization(e.to_string()))?;
            let temp = root.join(format!("{LAYOUT_FILE}.tmp"));
            fs::write(&temp, json).map_err(|e| CacheError::io(&temp, e))?;
            fs::rename(&temp, &path).map_err(|e| CacheError::io(&path, e))
        }
        Err(e) => Err(CacheError::io(&path, e)),
    }
}
