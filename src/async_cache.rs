//! Async Cache Adapter
//!
//! Runs the blocking disk operations of [`DiskCache`] on tokio's blocking
//! pool so async callers never stall a runtime worker on file I/O or a
//! shard lock wait.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::cache::{CacheKey, CacheStats, DiskCache};
use crate::error::Result;

/// Cheaply cloneable async handle to a shared [`DiskCache`].
#[derive(Debug, Clone)]
pub struct AsyncCache {
    inner: Arc<DiskCache>,
}

impl AsyncCache {
    pub fn new(cache: Arc<DiskCache>) -> Self {
        Self { inner: cache }
    }

    /// The underlying blocking cache.
    pub fn inner(&self) -> &Arc<DiskCache> {
        &self.inner
    }

    async fn run<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&DiskCache) -> Result<T> + Send + 'static,
    {
        let cache = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&cache)).await?
    }

    // == Get ==
    pub async fn get(&self, key: CacheKey) -> Result<Option<Vec<u8>>> {
        self.run(move |cache| cache.get(&key)).await
    }

    // == Put ==
    pub async fn put(&self, key: CacheKey, value: Vec<u8>) -> Result<()> {
        self.run(move |cache| cache.put(&key, &value)).await
    }

    pub async fn put_with_ttl(&self, key: CacheKey, value: Vec<u8>, ttl: Duration) -> Result<()> {
        self.run(move |cache| cache.put_with_ttl(&key, &value, ttl)).await
    }

    // == Remove ==
    pub async fn remove(&self, key: CacheKey) -> Result<bool> {
        self.run(move |cache| cache.remove(&key)).await
    }

    // == Typed Values ==
    pub async fn get_value<T>(&self, key: CacheKey) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send + 'static,
    {
        self.run(move |cache| cache.get_value(&key)).await
    }

    /// Serializes on the calling task, writes on the blocking pool.
    pub async fn put_value<T: Serialize + ?Sized>(&self, key: CacheKey, value: &T) -> Result<()> {
        let bytes = bincode::serialize(value)?;
        self.put(key, bytes).await
    }

    // == Maintenance ==
    pub async fn expire(&self) -> Result<usize> {
        self.run(|cache| cache.expire()).await
    }

    pub async fn clear(&self) -> Result<usize> {
        self.run(|cache| cache.clear()).await
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.stats()
    }
}
