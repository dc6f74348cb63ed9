//! Request and report models for the maintenance CLI
//!
//! This module defines the types used to turn command-line arguments into
//! cache keys and to serialize cache state for display.

pub mod reports;
pub mod requests;

// Re-export commonly used types
pub use reports::{EntryReport, ShardReport, StatsReport};
pub use requests::KeySpec;
