//! TTL Expiry Task
//!
//! Background task that periodically removes expired cache entries.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::DiskCache;

/// Spawns a background task that periodically removes expired entries.
///
/// Each sweep runs on the blocking pool. A failed sweep is logged and the
/// next one runs on schedule.
///
/// # Arguments
/// * `cache` - Shared reference to the cache
/// * `interval` - Time between sweeps
///
/// # Returns
/// A JoinHandle for the spawned task, which can be used to abort the task
/// during graceful shutdown.
///
/// # Example
/// ```ignore
/// let cache = Arc::new(DiskCache::open(Config::from_env())?);
/// let expiry_handle = spawn_expiry_task(cache.clone(), Duration::from_secs(60));
/// // Later, during shutdown:
/// expiry_handle.abort();
/// ```
pub fn spawn_expiry_task(cache: Arc<DiskCache>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_ms = interval.as_millis() as u64, "starting TTL expiry task");

        loop {
            tokio::time::sleep(interval).await;

            let sweep = {
                let cache = cache.clone();
                tokio::task::spawn_blocking(move || cache.expire()).await
            };

            match sweep {
                Ok(Ok(0)) => debug!("TTL expiry: no expired entries found"),
                Ok(Ok(removed)) => info!(removed, "TTL expiry: removed expired entries"),
                Ok(Err(e)) => warn!(error = %e, "TTL expiry sweep failed"),
                Err(e) => warn!(error = %e, "TTL expiry sweep panicked"),
            }
        }
    })
}
