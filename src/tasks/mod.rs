//! Background Tasks Module
//!
//! Contains background tasks that run periodically while a cache is open.
//!
//! # Tasks
//! - TTL Expiry: Removes expired cache entries at configured intervals

mod expiry;

pub use expiry::spawn_expiry_task;
