//! Session handles granting one caller use of a worker process

use crate::core::process::ProcessHandle;
use crate::pool::{Pool, PoolShared};
use shared::Gupid;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};

/// Exclusive (or concurrent, if the process allows it) use of one worker
/// process for one request lifetime
///
/// Closing the session, explicitly or by dropping it, returns the slot to
/// the pool and triggers a wait-list drain if the closure freed capacity.
/// The session keeps the process's endpoint alive even if the process is
/// detached from the pool mid-request; callers observe such a detach as an
/// I/O error on their connection, never as a dangling handle.
#[derive(Debug)]
pub struct Session {
    handle: Arc<ProcessHandle>,
    pool: Weak<PoolShared>,
    closed: bool,
}

impl Session {
    pub(crate) fn new(handle: Arc<ProcessHandle>, pool: Weak<PoolShared>) -> Self {
        Self {
            handle,
            pool,
            closed: false,
        }
    }

    pub fn gupid(&self) -> &Gupid {
        &self.handle.gupid
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid
    }

    /// Endpoint the caller connects to for the actual request traffic
    pub fn address(&self) -> SocketAddr {
        self.handle.address
    }

    pub fn app_group_name(&self) -> &str {
        &self.handle.app_group_name
    }

    /// Whether the backing process is still part of the pool
    ///
    /// `false` means the process was detached (or died) mid-request; the
    /// endpoint stays valid until this session closes, but new traffic will
    /// fail at the I/O layer.
    pub fn process_attached(&self) -> bool {
        self.handle.is_attached()
    }

    /// Close the session and return the slot to the pool
    pub fn close(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Some(shared) = self.pool.upgrade() {
            Pool::session_closed(&shared, &self.handle);
        } else {
            // Pool already destroyed; just drop our claim on the handle.
            self.handle.session_released();
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.release();
    }
}
