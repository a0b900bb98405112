//! Application process pool supervisor
//!
//! This library manages a fleet of long-lived worker processes grouped by
//! application identity: it assigns incoming requests to idle workers,
//! spawns new workers on demand under a global capacity ceiling, evicts
//! idle workers, and verifies its own cross-entity invariants after every
//! mutation. Process spawning and the wire protocol workers speak are
//! injected through the [`traits`] seams.

pub mod config;
pub mod core;
pub mod error;
pub mod inspect;
pub mod pool;
pub mod services;
pub mod traits;

// Re-export commonly used types
pub use crate::config::PoolConfig;
pub use crate::core::{
    EnabledState, Group, GroupLifeStatus, Options, Process, ProcessHandle, ProcessLifeStatus,
    RestartMethod, Session, SpawnMethod,
};
pub use crate::error::{DisableResult, PoolError, PoolResult, SpawnError};
pub use crate::inspect::{GroupSnapshot, InspectOptions, PoolSnapshot, ProcessSnapshot};
pub use crate::pool::{DisableCallback, GetCallback, GetTicket, Pool, PoolLifeStatus};
pub use crate::traits::{
    MockProcessMetricsSource, MockSpawner, ProcessMetricsSource, SpawnedProcess, Spawner,
    SystemMetricsSource,
};
