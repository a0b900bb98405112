//! Core pool entities
//!
//! The data model of the pool: admission keys, worker processes, sessions
//! and per-application groups. Everything mutable in here is owned by the
//! pool and only touched under the pool lock.

pub mod group;
pub mod options;
pub mod process;
pub mod session;

pub use group::{Group, GroupLifeStatus};
pub use options::{Options, RestartMethod, SpawnMethod};
pub use process::{EnabledState, Process, ProcessHandle, ProcessLifeStatus};
pub use session::Session;
