//! Eviction Manager Module
//!
//! Enforces the global size budget after every store. Entries are removed in
//! global stamp order: each step evicts from the shard holding the oldest
//! entry, and only down to the oldest entry of the next candidate shard.

use std::fmt;
use std::str::FromStr;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::cache::shard::{EvictRequest, Shard};
use crate::error::Result;

// == Eviction Policy ==
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Oldest store goes first; reads do not affect order
    LeastRecentlyStored,
    /// Oldest store-or-hit goes first
    LeastRecentlyUsed,
}

impl EvictionPolicy {
    pub fn touches_on_hit(self) -> bool {
        self == EvictionPolicy::LeastRecentlyUsed
    }
}

impl FromStr for EvictionPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "least-recently-stored" | "lrs" => Ok(EvictionPolicy::LeastRecentlyStored),
            "least-recently-used" | "lru" => Ok(EvictionPolicy::LeastRecentlyUsed),
            other => Err(format!("unknown eviction policy: {other}")),
        }
    }
}

impl fmt::Display for EvictionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvictionPolicy::LeastRecentlyStored => f.write_str("least-recently-stored"),
            EvictionPolicy::LeastRecentlyUsed => f.write_str("least-recently-used"),
        }
    }
}

// == Eviction Report ==
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub entries: u64,
    pub bytes: u64,
    /// Global stored size when the pass finished
    pub total_after: u64,
    /// True when only the protected entry remains and it alone exceeds the budget
    pub oversized: bool,
}

// == Eviction Manager ==
#[derive(Debug)]
pub struct EvictionManager {
    size_limit: u64,
    pass: Mutex<()>,
}

impl EvictionManager {
    pub fn new(size_limit: u64) -> Self {
        Self {
            size_limit,
            pass: Mutex::new(()),
        }
    }

    pub fn size_limit(&self) -> u64 {
        self.size_limit
    }

    /// Current stored size summed over all shards.
    pub fn total_size(shards: &[Shard]) -> u64 {
        shards.iter().map(Shard::total_size).sum()
    }

    // == Enforce ==
    /// Evicts globally oldest entries until the total is within budget.
    ///
    /// `keep` names the entry just stored as `(shard index, digest)`; it is
    /// evicted last, i.e. never, so an entry larger than the budget still
    /// lands after every other entry is gone.
    pub fn enforce(&self, shards: &[Shard], keep: Option<(usize, u128)>) -> Result<EvictionReport> {
        let mut report = EvictionReport::default();
        let mut total = Self::total_size(shards);
        if total <= self.size_limit {
            report.total_after = total;
            return Ok(report);
        }

        // At most one eviction pass runs at a time.
        let _pass = self.pass.lock();

        loop {
            total = Self::total_size(shards);
            if total <= self.size_limit {
                break;
            }

            let mut candidates: Vec<(u64, usize)> = shards
                .iter()
                .filter_map(|shard| {
                    let protect = keep.and_then(|(idx, digest)| (idx == shard.index()).then_some(digest));
                    shard
                        .oldest_sequence(protect)
                        .map(|sequence| (sequence, shard.index()))
                })
                .collect();
            candidates.sort_unstable();

            let Some(&(_, victim)) = candidates.first() else {
                report.oversized = true;
                warn!(
                    total,
                    limit = self.size_limit,
                    "single entry exceeds the size limit; keeping it"
                );
                break;
            };
            let oldest = candidates[0].0;
            let older_than = candidates
                .get(1)
                .map(|(sequence, _)| *sequence)
                .filter(|sequence| *sequence > oldest);
            let protect = keep.and_then(|(idx, digest)| (idx == victim).then_some(digest));

            let outcome = shards[victim].evict(EvictRequest {
                target_bytes: total - self.size_limit,
                older_than,
                keep: protect,
            })?;
            if outcome.entries == 0 {
                // Shard head moved under us; re-read.
                continue;
            }
            report.entries += outcome.entries;
            report.bytes += outcome.bytes;
        }

        report.total_after = total;
        if report.entries > 0 {
            info!(
                entries = report.entries,
                bytes = report.bytes,
                total = report.total_after,
                limit = self.size_limit,
                "eviction pass complete"
            );
        }
        Ok(report)
    }
}
