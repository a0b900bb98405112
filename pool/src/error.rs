//! Pool-specific error types

use std::time::Duration;
use thiserror::Error;

/// Error produced by a [`Spawner`](crate::traits::Spawner) implementation
///
/// Cloneable because one failed spawn is broadcast to every waiter that was
/// queued on the affected group.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to spawn process for application group '{group}': {message}")]
pub struct SpawnError {
    pub group: String,
    pub message: String,
}

impl SpawnError {
    pub fn new(group: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            message: message.into(),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoolError {
    #[error(transparent)]
    Spawn(#[from] SpawnError),

    #[error("Application group '{group}' is shutting down")]
    GroupShuttingDown { group: String },

    #[error("The process pool is shutting down")]
    PoolShuttingDown,

    #[error("Request queue is full: {queue_size} requests already waiting")]
    AtFullCapacity { queue_size: usize },

    #[error("Request was queued for {waited:?} without a process becoming available")]
    RequestQueueTimeout { waited: Duration },

    #[error("Request was canceled before a process became available")]
    RequestCanceled,

    #[error("Invalid pool configuration: {field} = {value}")]
    InvalidConfig { field: String, value: String },
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Outcome of a process disable request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisableResult {
    /// The process is drained and disabled
    Success,
    /// The process was detached before it finished draining
    Canceled,
    /// Draining is in progress; the callback fires when it completes
    Deferred,
    /// The process or its group no longer accepts the operation
    Error,
    /// The process was already disabled
    Noop,
}
