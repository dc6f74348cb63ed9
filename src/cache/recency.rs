//! Recency Tracking Module
//!
//! Orders resident entries for eviction. Every store (and, under the LRU
//! policy, every hit) stamps an entry with a value from a clock shared by all
//! shards, so stamps are comparable across shards and eviction can pick the
//! globally oldest entry.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

// == Sequence Clock ==
/// Monotonic stamp source shared by all shards of one cache.
#[derive(Debug)]
pub struct SequenceClock {
    next: AtomicU64,
}

impl SequenceClock {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Returns a stamp greater than every stamp handed out or observed so far.
    pub fn tick(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Moves the clock past a stamp recovered from disk.
    pub fn observe(&self, sequence: u64) {
        self.next.fetch_max(sequence.saturating_add(1), Ordering::Relaxed);
    }
}

impl Default for SequenceClock {
    fn default() -> Self {
        Self::new()
    }
}

// == Recency Index ==
/// Entry digests ordered by stamp; the first element is the oldest.
#[derive(Debug, Default)]
pub struct RecencyIndex {
    order: BTreeMap<u64, u128>,
}

impl RecencyIndex {
    pub fn insert(&mut self, sequence: u64, digest: u128) {
        self.order.insert(sequence, digest);
    }

    // == Touch ==
    /// Re-stamps an entry, making it the most recent.
    pub fn touch(&mut self, old_sequence: u64, new_sequence: u64) {
        if let Some(digest) = self.order.remove(&old_sequence) {
            self.order.insert(new_sequence, digest);
        }
    }

    pub fn remove(&mut self, sequence: u64) -> Option<u128> {
        self.order.remove(&sequence)
    }

    /// Returns the oldest entry other than `keep`.
    pub fn oldest_except(&self, keep: Option<u128>) -> Option<(u64, u128)> {
        self.order
            .iter()
            .find(|(_, d)| Some(**d) != keep)
            .map(|(s, d)| (*s, *d))
    }

    pub fn iter_oldest_first(&self) -> impl Iterator<Item = (u64, u128)> + '_ {
        self.order.iter().map(|(s, d)| (*s, *d))
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_is_monotonic() {
        let clock = SequenceClock::new();
        let a = clock.tick();
        let b = clock.tick();
        assert!(b > a);
    }

    #[test]
    fn test_clock_observe_skips_ahead() {
        let clock = SequenceClock::new();
        clock.observe(41);
        assert_eq!(clock.tick(), 42);
        // Observing an older stamp never moves the clock back
        clock.observe(3);
        assert_eq!(clock.tick(), 43);
    }

    #[test]
    fn test_oldest_follows_insertion_order() {
        let mut index = RecencyIndex::default();
        index.insert(1, 0xA);
        index.insert(2, 0xB);
        index.insert(3, 0xC);

        assert_eq!(index.oldest_except(None), Some((1, 0xA)));
        index.remove(1);
        assert_eq!(index.oldest_except(None), Some((2, 0xB)));
        assert_eq!(index.iter_oldest_first().count(), 2);
    }

    #[test]
    fn test_touch_moves_to_newest() {
        let mut index = RecencyIndex::default();
        index.insert(1, 0xA);
        index.insert(2, 0xB);
        index.insert(3, 0xC);

        index.touch(1, 4);

        let order: Vec<u128> = index.iter_oldest_first().map(|(_, d)| d).collect();
        assert_eq!(order, vec![0xB, 0xC, 0xA]);
    }

    #[test]
    fn test_touch_unknown_stamp_is_noop() {
        let mut index = RecencyIndex::default();
        index.insert(1, 0xA);
        index.touch(9, 10);
        assert_eq!(index.iter_oldest_first().count(), 1);
        assert_eq!(index.oldest_except(None), Some((1, 0xA)));
    }

    #[test]
    fn test_oldest_except_skips_kept_entry() {
        let mut index = RecencyIndex::default();
        index.insert(1, 0xA);
        index.insert(2, 0xB);

        assert_eq!(index.oldest_except(Some(0xA)), Some((2, 0xB)));
        assert_eq!(index.oldest_except(None), Some((1, 0xA)));

        index.remove(2);
        assert_eq!(index.oldest_except(Some(0xA)), None);
    }

    #[test]
    fn test_empty_index() {
        let mut index = RecencyIndex::default();
        assert_eq!(index.oldest_except(None), None);
        index.insert(5, 1);
        assert_eq!(index.remove(5), Some(1));
        assert_eq!(index.iter_oldest_first().count(), 0);
    }
}
