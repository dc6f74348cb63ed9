//! Error types for the disk cache
//!
//! Provides unified error handling using thiserror. A cache miss is not an
//! error: lookups return `Ok(None)` for it.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for cache operations.
///
/// Every error is local to the single call that produced it; no variant
/// leaves the cache in a poisoned state.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A shard's mutation lock could not be acquired within the configured timeout
    #[error("Timed out after {timeout:?} waiting for lock on shard {shard}")]
    LockTimeout { shard: usize, timeout: Duration },

    /// A stored blob failed validation or decompression
    #[error("Corrupt entry in shard {shard}: {reason}")]
    CorruptEntry { shard: usize, reason: String },

    /// Underlying disk read or write failed
    #[error("Storage I/O error at {}: {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A key or typed value could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration is unusable or disagrees with the on-disk layout
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A blocking cache task panicked or was cancelled
    #[error("Background cache task failed: {0}")]
    TaskFailed(String),
}

impl CacheError {
    /// Wraps an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        CacheError::StorageIo {
            path: path.into(),
            source,
        }
    }

    /// Returns true when the caller should fall back to recomputing the value.
    ///
    /// Configuration errors are the only ones that will not go away on their own.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CacheError::InvalidConfig(_))
    }
}

impl From<bincode::Error> for CacheError {
    fn from(e: bincode::Error) -> Self {
        CacheError::Serialization(e.to_string())
    }
}

impl From<tokio::task::JoinError> for CacheError {
    fn from(e: tokio::task::JoinError) -> Self {
        CacheError::TaskFailed(e.to_string())
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
