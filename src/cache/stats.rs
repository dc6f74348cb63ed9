//! Cache Statistics Module
//!
//! Tracks cache performance metrics including hits, misses, and evictions.
//! Counters are atomics so concurrent callers never serialize on them.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

// == Cache Stats ==
/// Point-in-time snapshot of cache metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    /// Number of successful cache retrievals
    pub hits: u64,
    /// Number of lookups that found no live entry
    pub misses: u64,
    /// Number of completed stores
    pub stores: u64,
    /// Number of entries removed to stay within the size limit
    pub evictions: u64,
    /// Stored bytes removed by eviction
    pub evicted_bytes: u64,
    /// Entries that failed validation on read and were discarded
    pub corrupt_entries: u64,
    /// Mutation lock acquisitions that timed out
    pub lock_timeouts: u64,
    /// Current number of entries in the cache
    pub total_entries: usize,
    /// Current stored size across all shards
    pub total_bytes: u64,
}

impl CacheStats {
    // == Constructor ==
    /// Creates a new CacheStats with all counters at zero.
    pub fn new() -> Self {
        Self::default()
    }

    // == Hit Rate ==
    /// Calculates the cache hit rate.
    ///
    /// Returns hits / (hits + misses), or 0.0 if no requests have been made.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// == Stats Recorder ==
/// Shared, lock-free counters behind [`CacheStats`].
#[derive(Debug, Default)]
pub struct StatsRecorder {
    hits: AtomicU64,
    misses: AtomicU64,
    stores: AtomicU64,
    evictions: AtomicU64,
    evicted_bytes: AtomicU64,
    corrupt_entries: AtomicU64,
    lock_timeouts: AtomicU64,
}

impl StatsRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evictions(&self, entries: u64, bytes: u64) {
        self.evictions.fetch_add(entries, Ordering::Relaxed);
        self.evicted_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_corrupt(&self) {
        self.corrupt_entries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lock_timeout(&self) {
        self.lock_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    /// Copies the counters; entry totals are supplied by the caller.
    pub fn snapshot(&self, total_entries: usize, total_bytes: u64) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            evicted_bytes: self.evicted_bytes.load(Ordering::Relaxed),
            corrupt_entries: self.corrupt_entries.load(Ordering::Relaxed),
            lock_timeouts: self.lock_timeouts.load(Ordering::Relaxed),
            total_entries,
            total_bytes,
        }
    }
}
