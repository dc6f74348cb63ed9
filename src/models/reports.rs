//! Report DTOs for the maintenance CLI
//!
//! Serializable views of cache state, printed as JSON.

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;

use crate::cache::{DiskCache, EntryInfo};

/// Body of the `stats` command
#[derive(Debug, Clone, Serialize)]
pub struct StatsReport {
    pub root: String,
    pub shard_count: usize,
    pub size_limit_bytes: u64,
    pub total_entries: usize,
    pub total_bytes: u64,
    /// Fraction of the size limit in use
    pub utilization: f64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub evictions: u64,
    pub corrupt_entries: u64,
    pub shards: Vec<ShardReport>,
}

/// Per-shard occupancy
#[derive(Debug, Clone, Default, Serialize)]
pub struct ShardReport {
    pub index: usize,
    pub entries: usize,
    pub bytes: u64,
}

impl StatsReport {
    /// Collects statistics and per-shard occupancy from an open cache
    pub fn collect(cache: &DiskCache) -> Self {
        let stats = cache.stats();
        let mut shards: Vec<ShardReport> = (0..cache.shard_count())
            .map(|index| ShardReport {
                index,
                ..ShardReport::default()
            })
            .collect();
        for entry in cache.entries() {
            if let Some(shard) = shards.get_mut(entry.shard) {
                shard.entries += 1;
                shard.bytes += entry.meta.size_bytes;
            }
        }

        let size_limit_bytes = cache.size_limit();
        Self {
            root: cache.config().root_directory.display().to_string(),
            shard_count: cache.shard_count(),
            size_limit_bytes,
            total_entries: stats.total_entries,
            total_bytes: stats.total_bytes,
            utilization: if size_limit_bytes == 0 {
                0.0
            } else {
                stats.total_bytes as f64 / size_limit_bytes as f64
            },
            hits: stats.hits,
            misses: stats.misses,
            hit_rate: stats.hit_rate(),
            evictions: stats.evictions,
            corrupt_entries: stats.corrupt_entries,
            shards,
        }
    }
}

/// One line of the `list` command
#[derive(Debug, Clone, Serialize)]
pub struct EntryReport {
    pub shard: usize,
    /// Display form of the key, `None` when the stored key no longer decodes
    pub key: Option<String>,
    pub size_bytes: u64,
    pub raw_size: u64,
    pub mode: String,
    pub sequence: u64,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_remaining_ms: Option<u64>,
}

impl From<&EntryInfo> for EntryReport {
    fn from(info: &EntryInfo) -> Self {
        Self {
            shard: info.shard,
            key: info.key.as_ref().map(ToString::to_string),
            size_bytes: info.meta.size_bytes,
            raw_size: info.meta.raw_size,
            mode: info.meta.mode.to_string(),
            sequence: info.meta.sequence,
            created_at: timestamp(info.meta.created_at_ms),
            expires_at: info.meta.expires_at_ms.map(timestamp),
            ttl_remaining_ms: info.meta.ttl_remaining_ms(),
        }
    }
}

fn timestamp(ms: u64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms as i64)
        .single()
        .unwrap_or_default()
}
