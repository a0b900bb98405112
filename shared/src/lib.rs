//! Shared types and messages for the application pool system
//!
//! This crate provides the identifiers, lifecycle event messages and the
//! logging bootstrap used by the pool supervisor and by the agent processes
//! that observe it.

pub mod errors;
pub mod events;
pub mod logging;
pub mod types;

// Re-export commonly used types
pub use errors::{SharedError, SharedResult};
pub use events::PoolEvent;
pub use types::{GroupSecret, Gupid, ProcessMetrics};
