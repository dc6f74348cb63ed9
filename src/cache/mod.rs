//! Cache Module
//!
//! Sharded on-disk cache with per-entry compression and a global size limit.

mod codec;
mod entry;
mod eviction;
mod key;
mod recency;
mod router;
mod shard;
mod stats;
mod store;

#[cfg(test)]
mod property_tests;

// Re-export public types
pub use codec::{Codec, CodecError, Compression, Mode, ThresholdCodec};
pub use entry::{current_timestamp_ms, EntryFormatError, EntryMeta};
pub use eviction::{EvictionManager, EvictionPolicy, EvictionReport};
pub use key::{CacheKey, EncodedKey, KeyPart};
pub use recency::SequenceClock;
pub use router::ShardRouter;
pub use shard::{EvictOutcome, EvictRequest, Shard, ShardOptions, StoreOutcome};
pub use stats::{CacheStats, StatsRecorder};
pub use store::{DiskCache, EntryInfo, LAYOUT_FILE, LAYOUT_VERSION};

// == Public Constants ==
/// Shard count used by default; fixed for the lifetime of a cache directory
pub const DEFAULT_SHARD_COUNT: usize = 64;

/// Default global size limit in bytes (300 GB)
pub const DEFAULT_SIZE_LIMIT: u64 = 300_000_000_000;
