//! Background services
//!
//! The garbage collector and the metrics collector run as tokio tasks
//! registered in the pool's interruptable task group; both observe the
//! shutdown channel and are joined on destroy. The debug mailbox is a
//! test-only sidecar the pool posts lifecycle events to.

pub mod debug;
pub(crate) mod gc;
pub(crate) mod metrics;

pub use debug::DebugSupport;
