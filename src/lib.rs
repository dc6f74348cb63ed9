//! Shard Cache - A sharded, size-bounded, compressing disk cache
//!
//! Memoizes expensive, recomputable results (decoded volumes, crops, derived
//! arrays) on local disk under a global byte budget, oldest entries first out.

pub mod async_cache;
pub mod cache;
pub mod config;
pub mod error;
pub mod models;
pub mod tasks;

pub use async_cache::AsyncCache;
pub use cache::{CacheKey, CacheStats, DiskCache};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_expiry_task;
