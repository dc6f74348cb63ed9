//! Shard Store Module
//!
//! One on-disk partition of the cache. Each entry is a separate file written
//! to a temp name, fsynced and renamed into place, so readers observe either
//! the previous entry or the new one and never a partial write.
//!
//! Mutations (`store`, `remove`, eviction, expiry) hold the shard's mutation
//! lock, acquired with a timeout. Fetches only take the index read lock for
//! the duration of a map lookup and read the file outside of any lock.

use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;
use xxhash_rust::xxh3::xxh3_128;

use crate::cache::codec::{Codec, Mode};
use crate::cache::entry::{
    current_timestamp_ms, decode_entry, read_prefix, EntryFormatError, EntryHeader, EntryMeta,
};
use crate::cache::key::{digest_stem, EncodedKey};
use crate::cache::recency::{RecencyIndex, SequenceClock};
use crate::error::{CacheError, Result};

/// File extension of committed entries
pub const ENTRY_EXTENSION: &str = "val";

/// File extension of in-flight writes
pub const TEMP_EXTENSION: &str = "tmp";

// == Shard Options ==
#[derive(Debug, Clone)]
pub struct ShardOptions {
    /// Maximum wait for the mutation lock
    pub lock_timeout: Duration,
    /// Whether a hit refreshes the entry's recency
    pub touch_on_hit: bool,
}

// == Outcomes ==
/// Result of a successful `store`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOutcome {
    /// Stored payload size now counted against the budget
    pub size_bytes: u64,
    pub mode: Mode,
    /// Stored size of the entry this one replaced
    pub replaced_bytes: Option<u64>,
}

/// Bounds for one eviction call.
#[derive(Debug, Clone, Copy, Default)]
pub struct EvictRequest {
    /// Stop once at least this many bytes are freed
    pub target_bytes: u64,
    /// Only evict entries stamped before this value
    pub older_than: Option<u64>,
    /// Never evict this entry
    pub keep: Option<u128>,
}

impl EvictRequest {
    pub fn bytes(target_bytes: u64) -> Self {
        Self {
            target_bytes,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictOutcome {
    pub entries: u64,
    pub bytes: u64,
}

// == Shard State ==
#[derive(Debug, Default)]
struct ShardState {
    entries: HashMap<u128, EntryMeta>,
    recency: RecencyIndex,
}

impl ShardState {
    fn insert(&mut self, digest: u128, meta: EntryMeta) -> Option<EntryMeta> {
        let previous = self.entries.insert(digest, meta.clone());
        if let Some(old) = &previous {
            self.recency.remove(old.sequence);
        }
        self.recency.insert(meta.sequence, digest);
        previous
    }

    fn remove(&mut self, digest: u128) -> Option<EntryMeta> {
        let removed = self.entries.remove(&digest)?;
        self.recency.remove(removed.sequence);
        Some(removed)
    }
}

// == Shard ==
/// A single on-disk key-value partition.
pub struct Shard {
    index: usize,
    dir: PathBuf,
    codec: Arc<dyn Codec>,
    clock: Arc<SequenceClock>,
    options: ShardOptions,
    mutation: Mutex<()>,
    state: RwLock<ShardState>,
    total_size: AtomicU64,
    #[cfg(test)]
    inject_write_failure: std::sync::atomic::AtomicBool,
    #[cfg(test)]
    inject_sync_failure: std::sync::atomic::AtomicBool,
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("index", &self.index)
            .field("dir", &self.dir)
            .field("entries", &self.len())
            .field("total_size", &self.total_size())
            .finish()
    }
}

impl Shard {
    // == Open ==
    /// Opens (or creates) the shard directory and rebuilds its index.
    ///
    /// Leftover temp files from interrupted writes are deleted, as are entry
    /// files whose header or length fails validation.
    pub fn open(
        index: usize,
        dir: PathBuf,
        codec: Arc<dyn Codec>,
        clock: Arc<SequenceClock>,
        options: ShardOptions,
    ) -> Result<Self> {
        fs::create_dir_all(&dir).map_err(|e| CacheError::io(&dir, e))?;

        let mut state = ShardState::default();
        let mut total: u64 = 0;
        let mut orphans = 0usize;
        let mut dropped = 0usize;

        let listing = fs::read_dir(&dir).map_err(|e| CacheError::io(&dir, e))?;
        for dirent in listing {
            let path = dirent.map_err(|e| CacheError::io(&dir, e))?.path();
            match path.extension().and_then(|ext| ext.to_str()) {
                Some(TEMP_EXTENSION) => {
                    remove_if_present(&path)?;
                    orphans += 1;
                }
                Some(ENTRY_EXTENSION) => match recover_entry(&path) {
                    Ok((digest, meta)) => {
                        clock.observe(meta.sequence);
                        total += meta.size_bytes;
                        if let Some(previous) = state.insert(digest, meta) {
                            total -= previous.size_bytes;
                        }
                    }
                    Err(reason) => {
                        warn!(shard = index, path = %path.display(), %reason, "dropping unreadable entry");
                        remove_if_present(&path)?;
                        dropped += 1;
                    }
                },
                _ => {}
            }
        }

        if orphans > 0 || dropped > 0 || !state.entries.is_empty() {
            info!(
                shard = index,
                entries = state.entries.len(),
                bytes = total,
                orphans,
                dropped,
                "recovered shard"
            );
        }

        Ok(Self {
            index,
            dir,
            codec,
            clock,
            options,
            mutation: Mutex::new(()),
            state: RwLock::new(state),
            total_size: AtomicU64::new(total),
            #[cfg(test)]
            inject_write_failure: std::sync::atomic::AtomicBool::new(false),
            #[cfg(test)]
            inject_sync_failure: std::sync::atomic::AtomicBool::new(false),
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    // == Store ==
    /// Encodes and durably writes `raw` under `key`, replacing any prior entry.
    ///
    /// Returns only after the entry file and its directory entry are synced.
    /// If the directory sync fails the entry is already published and
    /// indexed, and the error is still returned.
    pub fn store(
        &self,
        key: &EncodedKey,
        raw: &[u8],
        expires_at_ms: Option<u64>,
    ) -> Result<StoreOutcome> {
        let _guard = self.lock_mutation()?;

        let (payload, mode) = self.codec.encode(raw);
        let sequence = self.clock.tick();
        let created_at_ms = current_timestamp_ms();
        let header = EntryHeader::seal(
            key.bytes(),
            &payload,
            mode,
            raw.len() as u64,
            sequence,
            created_at_ms,
            expires_at_ms,
        );

        let path = self.entry_path(key.digest());
        self.publish(&path, &header, key.bytes(), &payload)?;

        let size_bytes = payload.len() as u64;
        let meta = EntryMeta {
            key: key.bytes().to_vec(),
            sequence,
            size_bytes,
            raw_size: raw.len() as u64,
            mode,
            created_at_ms,
            expires_at_ms,
        };
        let replaced = self.state.write().insert(key.digest(), meta);

        self.total_size.fetch_add(size_bytes, Ordering::AcqRel);
        let replaced_bytes = replaced.map(|old| {
            self.total_size.fetch_sub(old.size_bytes, Ordering::AcqRel);
            old.size_bytes
        });

        // The renamed file is visible, so the index already follows it
        if let Err(e) = self.sync_shard_dir() {
            warn!(shard = self.index, error = %e, "entry published but directory sync failed");
            return Err(CacheError::io(&self.dir, e));
        }

        debug!(shard = self.index, size_bytes, %mode, "stored entry");
        Ok(StoreOutcome {
            size_bytes,
            mode,
            replaced_bytes,
        })
    }

    // == Fetch ==
    /// Returns the decoded value for `key`, or `None` when it is not resident.
    ///
    /// Expired entries are misses. Files that fail validation surface as
    /// `CorruptEntry`.
    pub fn fetch(&self, key: &EncodedKey) -> Result<Option<Vec<u8>>> {
        let digest = key.digest();
        let seen_sequence = {
            let state = self.state.read();
            match state.entries.get(&digest) {
                Some(meta) if meta.is_expired() => return Ok(None),
                Some(meta) => meta.sequence,
                None => return Ok(None),
            }
        };

        let path = self.entry_path(digest);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            // Evicted or replaced between the index lookup and the read
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let value = self.decode_value(&bytes, key)?;

        if self.options.touch_on_hit {
            let mut state = self.state.write();
            let current = state.entries.get(&digest).map(|meta| meta.sequence);
            if current == Some(seen_sequence) {
                let fresh = self.clock.tick();
                state.recency.touch(seen_sequence, fresh);
                if let Some(meta) = state.entries.get_mut(&digest) {
                    meta.sequence = fresh;
                }
            }
        }

        Ok(Some(value))
    }

    fn decode_value(&self, bytes: &[u8], key: &EncodedKey) -> Result<Vec<u8>> {
        let entry = decode_entry(bytes).map_err(|e| self.corrupt(e))?;
        if entry.key != key.bytes() {
            return Err(self.corrupt(EntryFormatError::KeyMismatch));
        }
        let mode = entry.header.mode().map_err(|e| self.corrupt(e))?;
        let value = self.codec.decode(entry.payload, mode).map_err(|e| {
            CacheError::CorruptEntry {
                shard: self.index,
                reason: e.to_string(),
            }
        })?;
        if value.len() as u64 != entry.header.raw_size {
            return Err(self.corrupt(EntryFormatError::SizeMismatch {
                expected: entry.header.raw_size,
                actual: value.len() as u64,
            }));
        }
        Ok(value)
    }

    // == Remove ==
    /// Deletes the entry for `key`. Returns whether one was resident.
    pub fn remove(&self, key: &EncodedKey) -> Result<bool> {
        let _guard = self.lock_mutation()?;
        Ok(self.delete_entry(key.digest())?.is_some())
    }

    // == Evict ==
    /// Removes entries oldest-first until `target_bytes_to_free` bytes are freed
    /// or the shard is empty. Returns the bytes actually freed.
    pub fn evict_oldest(&self, target_bytes_to_free: u64) -> Result<u64> {
        Ok(self.evict(EvictRequest::bytes(target_bytes_to_free))?.bytes)
    }

    /// Oldest-first eviction bounded by `request`.
    pub fn evict(&self, request: EvictRequest) -> Result<EvictOutcome> {
        let _guard = self.lock_mutation()?;
        let mut outcome = EvictOutcome::default();

        while outcome.bytes < request.target_bytes {
            let candidate = self.state.read().recency.oldest_except(request.keep);
            let Some((sequence, digest)) = candidate else {
                break;
            };
            if request.older_than.is_some_and(|limit| sequence >= limit) {
                break;
            }
            if let Some(meta) = self.delete_entry(digest)? {
                outcome.entries += 1;
                outcome.bytes += meta.size_bytes;
            }
        }

        if outcome.entries > 0 {
            debug!(
                shard = self.index,
                entries = outcome.entries,
                bytes = outcome.bytes,
                "evicted entries"
            );
        }
        Ok(outcome)
    }

    // == Expire ==
    /// Removes every entry whose expiration time is at or before `now_ms`.
    pub fn expire(&self, now_ms: u64) -> Result<usize> {
        let _guard = self.lock_mutation()?;
        let expired: Vec<u128> = self
            .state
            .read()
            .entries
            .iter()
            .filter(|(_, meta)| meta.is_expired_at(now_ms))
            .map(|(digest, _)| *digest)
            .collect();

        let mut count = 0;
        for digest in expired {
            if self.delete_entry(digest)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    // == Clear ==
    /// Removes every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize> {
        let _guard = self.lock_mutation()?;
        let digests: Vec<u128> = self.state.read().entries.keys().copied().collect();
        let mut count = 0;
        for digest in digests {
            if self.delete_entry(digest)?.is_some() {
                count += 1;
            }
        }
        Ok(count)
    }

    // == Size ==
    /// Sum of resident entries' stored sizes.
    pub fn total_size(&self) -> u64 {
        self.total_size.load(Ordering::Acquire)
    }

    pub fn len(&self) -> usize {
        self.state.read().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().entries.is_empty()
    }

    /// Stamp of the oldest resident entry other than `keep`.
    pub fn oldest_sequence(&self, keep: Option<u128>) -> Option<u64> {
        self.state
            .read()
            .recency
            .oldest_except(keep)
            .map(|(sequence, _)| sequence)
    }

    /// Snapshot of resident entries, oldest first.
    pub fn entries(&self) -> Vec<EntryMeta> {
        let state = self.state.read();
        state
            .recency
            .iter_oldest_first()
            .filter_map(|(_, digest)| state.entries.get(&digest).cloned())
            .collect()
    }

    // == Internals ==
    fn lock_mutation(&self) -> Result<MutexGuard<'_, ()>> {
        self.mutation
            .try_lock_for(self.options.lock_timeout)
            .ok_or_else(|| {
                warn!(shard = self.index, timeout = ?self.options.lock_timeout, "shard lock timed out");
                CacheError::LockTimeout {
                    shard: self.index,
                    timeout: self.options.lock_timeout,
                }
            })
    }

    fn entry_path(&self, digest: u128) -> PathBuf {
        self.dir
            .join(format!("{}.{ENTRY_EXTENSION}", digest_stem(digest)))
    }

    /// Removes the file first so a failed unlink leaves the index untouched.
    /// Caller must hold the mutation lock.
    fn delete_entry(&self, digest: u128) -> Result<Option<EntryMeta>> {
        if !self.state.read().entries.contains_key(&digest) {
            return Ok(None);
        }
        remove_if_present(&self.entry_path(digest))?;
        let removed = self.state.write().remove(digest);
        if let Some(meta) = &removed {
            self.total_size.fetch_sub(meta.size_bytes, Ordering::AcqRel);
        }
        Ok(removed)
    }

    /// Writes and syncs a temp file, then renames it over `path`.
    fn publish(
        &self,
        path: &Path,
        header: &EntryHeader,
        key: &[u8],
        payload: &[u8],
    ) -> Result<()> {
        let temp = self
            .dir
            .join(format!("{}.{TEMP_EXTENSION}", Uuid::new_v4().simple()));

        let result = self
            .write_temp(&temp, header, key, payload)
            .and_then(|()| fs::rename(&temp, path));
        if let Err(e) = result {
            // Clean up temp file
            let _ = fs::remove_file(&temp);
            return Err(CacheError::io(path, e));
        }
        Ok(())
    }

    fn sync_shard_dir(&self) -> io::Result<()> {
        self.injected_sync_failure()?;
        sync_dir(&self.dir)
    }

    fn write_temp(
        &self,
        temp: &Path,
        header: &EntryHeader,
        key: &[u8],
        payload: &[u8],
    ) -> io::Result<()> {
        let header_bytes = header.to_bytes().map_err(io::Error::other)?;
        let mut file = OpenOptions::new().write(true).create_new(true).open(temp)?;
        file.write_all(&header_bytes)?;
        file.write_all(key)?;

        self.injected_failure(&mut file, payload)?;
        file.write_all(payload)?;
        file.sync_all()
    }

    fn corrupt(&self, error: EntryFormatError) -> CacheError {
        CacheError::CorruptEntry {
            shard: self.index,
            reason: error.to_string(),
        }
    }

    #[cfg(not(test))]
    fn injected_failure(&self, _file: &mut File, _payload: &[u8]) -> io::Result<()> {
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_sync_failure(&self) -> io::Result<()> {
        Ok(())
    }

    #[cfg(test)]
    fn injected_failure(&self, file: &mut File, payload: &[u8]) -> io::Result<()> {
        if self.inject_write_failure.swap(false, Ordering::SeqCst) {
            file.write_all(&payload[..payload.len() / 2])?;
            return Err(io::Error::other("injected write failure"));
        }
        Ok(())
    }

    #[cfg(test)]
    fn injected_sync_failure(&self) -> io::Result<()> {
        if self.inject_sync_failure.swap(false, Ordering::SeqCst) {
            return Err(io::Error::other("injected directory sync failure"));
        }
        Ok(())
    }

    /// Makes the next `store` fail after a partial temp-file write.
    #[cfg(test)]
    pub(crate) fn fail_next_write(&self) {
        self.inject_write_failure.store(true, Ordering::SeqCst);
    }

    /// Makes the next `store` fail after its rename, at the directory sync.
    #[cfg(test)]
    pub(crate) fn fail_next_dir_sync(&self) {
        self.inject_sync_failure.store(true, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn hold_mutation_lock(&self) -> MutexGuard<'_, ()> {
        self.mutation.lock()
    }
}

fn recover_entry(path: &Path) -> std::result::Result<(u128, EntryMeta), EntryFormatError> {
    let mut file = File::open(path)?;
    let file_len = file.metadata()?.len();
    let (header, key) = read_prefix(&mut file, file_len)?;

    let digest = xxh3_128(&key);
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
    if digest_stem(digest) != stem {
        return Err(EntryFormatError::KeyMismatch);
    }
    Ok((digest, EntryMeta::from_header(&header, key)?))
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(CacheError::io(path, e)),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::codec::{Compression, ThresholdCodec};
    use crate::cache::entry::HEADER_LEN;
    use crate::cache::key::CacheKey;
    use tempfile::TempDir;

    fn options() -> ShardOptions {
        ShardOptions {
            lock_timeout: Duration::from_millis(100),
            touch_on_hit: false,
        }
    }

    fn open_shard(dir: &Path, options: ShardOptions) -> Shard {
        let codec = Arc::new(ThresholdCodec::new(Compression::Gzip { level: 1 }, 100));
        Shard::open(0, dir.to_path_buf(), codec, Arc::new(SequenceClock::new()), options).unwrap()
    }

    fn key(name: &str) -> EncodedKey {
        CacheKey::from(name).encode().unwrap()
    }

    #[test]
    fn test_store_and_fetch() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());

        let outcome = shard.store(&key("a"), b"hello", None).unwrap();
        assert_eq!(outcome.mode, Mode::Raw);
        assert_eq!(outcome.size_bytes, 5);
        assert_eq!(shard.fetch(&key("a")).unwrap(), Some(b"hello".to_vec()));
        assert_eq!(shard.total_size(), 5);
    }

    #[test]
    fn test_fetch_missing_is_none() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        assert_eq!(shard.fetch(&key("missing")).unwrap(), None);
    }

    #[test]
    fn test_large_value_is_compressed() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        let value = vec![42u8; 2000];

        let outcome = shard.store(&key("b"), &value, None).unwrap();
        assert_eq!(outcome.mode, Mode::Gzip);
        assert!(outcome.size_bytes < 2000);
        assert_eq!(shard.fetch(&key("b")).unwrap(), Some(value));
    }

    #[test]
    fn test_replace_adjusts_total() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());

        shard.store(&key("a"), &[1u8; 50], None).unwrap();
        let outcome = shard.store(&key("a"), &[2u8; 30], None).unwrap();

        assert_eq!(outcome.replaced_bytes, Some(50));
        assert_eq!(shard.total_size(), 30);
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.fetch(&key("a")).unwrap(), Some(vec![2u8; 30]));
    }

    #[test]
    fn test_evict_oldest_order() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        shard.store(&key("A"), &[0u8; 10], None).unwrap();
        shard.store(&key("B"), &[0u8; 10], None).unwrap();
        shard.store(&key("C"), &[0u8; 10], None).unwrap();

        assert_eq!(shard.evict_oldest(1).unwrap(), 10);
        assert_eq!(shard.fetch(&key("A")).unwrap(), None);
        assert!(shard.fetch(&key("B")).unwrap().is_some());

        assert_eq!(shard.evict_oldest(1).unwrap(), 10);
        assert_eq!(shard.fetch(&key("B")).unwrap(), None);
        assert!(shard.fetch(&key("C")).unwrap().is_some());
    }

    #[test]
    fn test_evict_stops_when_empty() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        shard.store(&key("A"), &[0u8; 10], None).unwrap();
        shard.store(&key("B"), &[0u8; 20], None).unwrap();

        assert_eq!(shard.evict_oldest(1_000).unwrap(), 30);
        assert!(shard.is_empty());
        assert_eq!(shard.total_size(), 0);
        assert_eq!(shard.evict_oldest(10).unwrap(), 0);
    }

    #[test]
    fn test_evict_respects_bounds() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        shard.store(&key("A"), &[0u8; 10], None).unwrap();
        shard.store(&key("B"), &[0u8; 10], None).unwrap();

        let keep = key("A").digest();
        let outcome = shard
            .evict(EvictRequest {
                target_bytes: 100,
                older_than: None,
                keep: Some(keep),
            })
            .unwrap();
        assert_eq!(outcome.entries, 1);
        assert!(shard.fetch(&key("A")).unwrap().is_some());

        let outcome = shard
            .evict(EvictRequest {
                target_bytes: 100,
                older_than: Some(0),
                keep: None,
            })
            .unwrap();
        assert_eq!(outcome, EvictOutcome::default());
    }

    #[test]
    fn test_lock_timeout() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());

        let _held = shard.hold_mutation_lock();
        let result = shard.store(&key("a"), b"v", None);
        assert!(matches!(result, Err(CacheError::LockTimeout { shard: 0, .. })));

        // Fetches do not need the mutation lock
        assert_eq!(shard.fetch(&key("a")).unwrap(), None);
    }

    #[test]
    fn test_failed_write_keeps_prior_entry() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        shard.store(&key("a"), b"old value", None).unwrap();

        shard.fail_next_write();
        let result = shard.store(&key("a"), b"new value that never lands", None);
        assert!(matches!(result, Err(CacheError::StorageIo { .. })));

        assert_eq!(shard.fetch(&key("a")).unwrap(), Some(b"old value".to_vec()));
        assert_eq!(shard.total_size(), 9);
        let leftovers = fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|d| d.ok())
            .filter(|d| d.path().extension().and_then(|e| e.to_str()) == Some(TEMP_EXTENSION))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_failed_dir_sync_keeps_index_in_step_with_disk() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        shard.store(&key("a"), b"old value", None).unwrap();

        shard.fail_next_dir_sync();
        let result = shard.store(&key("a"), b"newer value", None);
        assert!(matches!(result, Err(CacheError::StorageIo { .. })));

        // The rename landed, so the index describes the new file
        assert_eq!(shard.fetch(&key("a")).unwrap(), Some(b"newer value".to_vec()));
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.total_size(), 11);

        shard.fail_next_dir_sync();
        assert!(shard.store(&key("b"), b"fresh", None).is_err());
        assert_eq!(shard.len(), 2);
        assert_eq!(shard.total_size(), 16);

        let outcome = shard.evict_oldest(u64::MAX).unwrap();
        assert_eq!(outcome, 16);
        assert!(shard.is_empty());
        assert!(!shard.entry_path(key("b").digest()).exists());
    }

    #[test]
    fn test_overflowing_header_size_is_corrupt_and_dropped_on_open() {
        let tmp = TempDir::new().unwrap();
        let path = {
            let shard = open_shard(tmp.path(), options());
            shard.store(&key("a"), b"value", None).unwrap();
            shard.store(&key("b"), b"other", None).unwrap();

            let path = shard.entry_path(key("a").digest());
            let bytes = fs::read(&path).unwrap();
            let mut header = EntryHeader::parse(&bytes).unwrap();
            header.stored_size = u64::MAX - 10;
            let mut rewritten = header.to_bytes().unwrap();
            rewritten.extend_from_slice(&bytes[HEADER_LEN..]);
            fs::write(&path, rewritten).unwrap();

            assert!(matches!(
                shard.fetch(&key("a")),
                Err(CacheError::CorruptEntry { .. })
            ));
            path
        };

        let shard = open_shard(tmp.path(), options());
        assert_eq!(shard.len(), 1);
        assert_eq!(shard.total_size(), 5);
        assert!(!path.exists());
        assert_eq!(shard.fetch(&key("b")).unwrap(), Some(b"other".to_vec()));
    }

    #[test]
    fn test_truncated_file_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        shard.store(&key("a"), &[9u8; 500], None).unwrap();

        let path = shard.entry_path(key("a").digest());
        let len = fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(len - 10).unwrap();

        assert!(matches!(
            shard.fetch(&key("a")),
            Err(CacheError::CorruptEntry { .. })
        ));
    }

    #[test]
    fn test_reopen_recovers_entries_and_order() {
        let tmp = TempDir::new().unwrap();
        {
            let shard = open_shard(tmp.path(), options());
            shard.store(&key("A"), &[1u8; 10], None).unwrap();
            shard.store(&key("B"), &[2u8; 20], None).unwrap();
        }
        fs::write(tmp.path().join(format!("orphan.{TEMP_EXTENSION}")), b"partial").unwrap();
        fs::write(tmp.path().join(format!("deadbeef.{ENTRY_EXTENSION}")), b"junk").unwrap();

        let shard = open_shard(tmp.path(), options());
        assert_eq!(shard.len(), 2);
        assert_eq!(shard.total_size(), 30);
        assert_eq!(shard.fetch(&key("B")).unwrap(), Some(vec![2u8; 20]));
        assert!(!tmp.path().join(format!("orphan.{TEMP_EXTENSION}")).exists());
        assert!(!tmp.path().join(format!("deadbeef.{ENTRY_EXTENSION}")).exists());

        shard.evict_oldest(1).unwrap();
        assert_eq!(shard.fetch(&key("A")).unwrap(), None);
    }

    #[test]
    fn test_touch_on_hit_refreshes_recency() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(
            tmp.path(),
            ShardOptions {
                touch_on_hit: true,
                ..options()
            },
        );
        shard.store(&key("A"), &[0u8; 10], None).unwrap();
        shard.store(&key("B"), &[0u8; 10], None).unwrap();

        shard.fetch(&key("A")).unwrap();
        shard.evict_oldest(1).unwrap();

        assert!(shard.fetch(&key("A")).unwrap().is_some());
        assert_eq!(shard.fetch(&key("B")).unwrap(), None);
    }

    #[test]
    fn test_expire_and_clear() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        let now = current_timestamp_ms();
        shard.store(&key("old"), b"v", Some(now.saturating_sub(1))).unwrap();
        shard.store(&key("fresh"), b"v", Some(now + 60_000)).unwrap();
        shard.store(&key("forever"), b"v", None).unwrap();

        assert_eq!(shard.fetch(&key("old")).unwrap(), None);
        assert_eq!(shard.expire(now).unwrap(), 1);
        assert_eq!(shard.len(), 2);

        assert_eq!(shard.clear().unwrap(), 2);
        assert!(shard.is_empty());
        assert_eq!(shard.total_size(), 0);
    }

    #[test]
    fn test_remove() {
        let tmp = TempDir::new().unwrap();
        let shard = open_shard(tmp.path(), options());
        shard.store(&key("a"), b"v", None).unwrap();

        assert!(shard.remove(&key("a")).unwrap());
        assert!(!shard.remove(&key("a")).unwrap());
        assert_eq!(shard.fetch(&key("a")).unwrap(), None);
    }
}
