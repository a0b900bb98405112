//! Core shared types and identifiers

use crate::errors::{SharedError, SharedResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Globally unique process identifier
///
/// Stable across the whole pool lifetime and safe against OS pid reuse. A
/// process keeps its gupid from spawn to detach, which makes it the key for
/// every per-process administrative operation.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Gupid(Uuid);

impl Gupid {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> SharedResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SharedError::InvalidGupid { input: s.to_string() })
    }
}

impl Default for Gupid {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for Gupid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Random per-group token for authenticated group operations
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupSecret(Uuid);

impl GroupSecret {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> SharedResult<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| SharedError::InvalidSecret { input: s.to_string() })
    }
}

impl Default for GroupSecret {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// OS-level resource usage for a single worker process
///
/// Collected in batch by the metrics collector and merged into the pool's
/// bookkeeping; all fields are zero until the first collection cycle.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessMetrics {
    /// CPU usage in percent of one core
    pub cpu_percent: f32,

    /// Resident set size in bytes
    pub rss_bytes: u64,

    /// Seconds since the OS started the process
    pub uptime_secs: u64,
}
