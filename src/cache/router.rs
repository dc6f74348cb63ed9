//! Shard Router Module
//!
//! Maps a key to one of N shards. The mapping depends only on the key's
//! serialized bytes and N, so it is stable across process restarts.

use crate::cache::key::EncodedKey;

// == Shard Router ==
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShardRouter {
    shard_count: usize,
}

impl ShardRouter {
    /// Creates a router over `shard_count` shards. Zero is treated as one.
    pub fn new(shard_count: usize) -> Self {
        Self {
            shard_count: shard_count.max(1),
        }
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    // == Route ==
    /// Returns the shard index for `key`, in `[0, shard_count)`.
    pub fn route(&self, key: &EncodedKey) -> usize {
        (key.route_hash() % self.shard_count as u64) as usize
    }
}
