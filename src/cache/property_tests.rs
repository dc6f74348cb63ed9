//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the cache against a simple in-memory model.

use proptest::prelude::*;
use std::collections::HashMap;
use std::time::Duration;
use tempfile::TempDir;

use crate::cache::{CacheKey, Codec, Compression, DiskCache, Mode, ShardRouter, ThresholdCodec};
use crate::config::Config;

// == Test Configuration ==
const TEST_SHARDS: usize = 4;
const TEST_THRESHOLD: usize = 100;

fn open_cache(dir: &TempDir, size_limit_bytes: u64, compression: Compression) -> DiskCache {
    DiskCache::open(Config {
        shard_count: TEST_SHARDS,
        size_limit_bytes,
        compression_threshold_bytes: TEST_THRESHOLD,
        compression,
        lock_timeout: Duration::from_millis(500),
        ..Config::new(dir.path())
    })
    .unwrap()
}

// == Strategies ==
/// Generates structured keys: a function name plus one or two arguments
fn key_strategy() -> impl Strategy<Value = CacheKey> {
    ("[a-zA-Z_]{1,16}", "[a-f0-9]{1,24}", any::<u64>())
        .prop_map(|(name, uid, index)| CacheKey::new(name).with(uid).with(index))
}

/// Values on both sides of the compression threshold
fn value_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..TEST_THRESHOLD),
        prop::collection::vec(0u8..4, TEST_THRESHOLD..2000),
        prop::collection::vec(any::<u8>(), TEST_THRESHOLD..600),
    ]
}

fn compression_strategy() -> impl Strategy<Value = Compression> {
    prop_oneof![
        Just(Compression::None),
        (1u32..=9).prop_map(|level| Compression::Gzip { level }),
        (1i32..=5).prop_map(|level| Compression::Zstd { level }),
    ]
}

#[derive(Debug, Clone)]
enum CacheOp {
    Put { key: u8, value: Vec<u8> },
    Get { key: u8 },
    Remove { key: u8 },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        (0u8..16, prop::collection::vec(any::<u8>(), 0..200))
            .prop_map(|(key, value)| CacheOp::Put { key, value }),
        (0u8..16).prop_map(|key| CacheOp::Get { key }),
        (0u8..16).prop_map(|key| CacheOp::Remove { key }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    // Property 1: Round-trip Storage Consistency
    // Storing a value and reading it back returns the exact bytes stored.
    #[test]
    fn prop_roundtrip_storage(
        key in key_strategy(),
        value in value_strategy(),
        compression in compression_strategy()
    ) {
        let tmp = TempDir::new().unwrap();
        let cache = open_cache(&tmp, 1_000_000, compression);

        cache.put(&key, &value).unwrap();
        prop_assert_eq!(cache.get(&key).unwrap(), Some(value));
    }

    // Property 2: Overwrite Semantics
    // A second store under the same key replaces the first and frees its bytes.
    #[test]
    fn prop_overwrite_semantics(
        key in key_strategy(),
        first in value_strategy(),
        second in value_strategy()
    ) {
        let tmp = TempDir::new().unwrap();
        let cache = open_cache(&tmp, 1_000_000, Compression::None);

        cache.put(&key, &first).unwrap();
        cache.put(&key, &second).unwrap();

        prop_assert_eq!(cache.len(), 1);
        prop_assert_eq!(cache.total_size(), second.len() as u64);
        prop_assert_eq!(cache.get(&key).unwrap(), Some(second));
    }

    // Property 3: Size Budget
    // After every store the total is within the limit, unless a single
    // entry larger than the limit is all that remains.
    #[test]
    fn prop_size_budget(sizes in prop::collection::vec(1usize..1500, 1..40)) {
        let tmp = TempDir::new().unwrap();
        let cache = open_cache(&tmp, 1000, Compression::None);

        for (i, size) in sizes.into_iter().enumerate() {
            cache.put(&CacheKey::new("v").with(i), &vec![7u8; size]).unwrap();
            let total = cache.total_size();
            prop_assert!(total <= 1000 || cache.len() == 1, "total {} with {} entries", total, cache.len());
        }
    }

    // Property 4: Oldest First Eviction
    // With distinct keys the surviving entries are always the most recent stores.
    #[test]
    fn prop_eviction_keeps_newest(sizes in prop::collection::vec(1usize..300, 1..40)) {
        let tmp = TempDir::new().unwrap();
        let cache = open_cache(&tmp, 1000, Compression::None);
        let count = sizes.len();

        for (i, size) in sizes.into_iter().enumerate() {
            cache.put(&CacheKey::new("v").with(i), &vec![1u8; size]).unwrap();
        }

        let resident: Vec<bool> = (0..count)
            .map(|i| cache.get(&CacheKey::new("v").with(i)).unwrap().is_some())
            .collect();
        let first_resident = resident.iter().position(|r| *r).unwrap();
        prop_assert!(resident[first_resident..].iter().all(|r| *r), "residents {:?}", resident);
    }

    // Property 5: Statistics Accuracy
    // Hits, misses and entry counts agree with an in-memory model.
    #[test]
    fn prop_statistics_accuracy(ops in prop::collection::vec(cache_op_strategy(), 1..40)) {
        let tmp = TempDir::new().unwrap();
        let cache = open_cache(&tmp, 1_000_000, Compression::Gzip { level: 1 });
        let mut model: HashMap<u8, Vec<u8>> = HashMap::new();
        let mut expected_hits = 0u64;
        let mut expected_misses = 0u64;

        for op in ops {
            match op {
                CacheOp::Put { key, value } => {
                    cache.put(&CacheKey::new("k").with(u64::from(key)), &value).unwrap();
                    model.insert(key, value);
                }
                CacheOp::Get { key } => {
                    let found = cache.get(&CacheKey::new("k").with(u64::from(key))).unwrap();
                    match model.get(&key) {
                        Some(expected) => {
                            expected_hits += 1;
                            prop_assert_eq!(found.as_ref(), Some(expected));
                        }
                        None => {
                            expected_misses += 1;
                            prop_assert!(found.is_none());
                        }
                    }
                }
                CacheOp::Remove { key } => {
                    let removed = cache.remove(&CacheKey::new("k").with(u64::from(key))).unwrap();
                    prop_assert_eq!(removed, model.remove(&key).is_some());
                }
            }
        }

        let stats = cache.stats();
        prop_assert_eq!(stats.hits, expected_hits);
        prop_assert_eq!(stats.misses, expected_misses);
        prop_assert_eq!(stats.total_entries, model.len());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // Property 6: Codec Round Trip
    // Decoding with the recorded mode restores the input; small values stay raw.
    #[test]
    fn prop_codec_roundtrip(
        value in prop::collection::vec(any::<u8>(), 0..4096),
        compression in compression_strategy(),
        threshold in 0usize..2048
    ) {
        let codec = ThresholdCodec::new(compression, threshold);
        let (stored, mode) = codec.encode(&value);

        if value.len() < threshold {
            prop_assert_eq!(mode, Mode::Raw);
        }
        prop_assert_eq!(codec.decode(&stored, mode).unwrap(), value);
    }

    // Property 7: Routing Determinism
    // The shard for a key depends only on the key and the shard count.
    #[test]
    fn prop_routing_determinism(key in key_strategy(), shard_count in 1usize..128) {
        let encoded = key.encode().unwrap();
        let again = key.clone().encode().unwrap();
        let shard = ShardRouter::new(shard_count).route(&encoded);

        prop_assert!(shard < shard_count);
        prop_assert_eq!(ShardRouter::new(shard_count).route(&again), shard);
    }
}
