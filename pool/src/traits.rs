//! Service traits for dependency injection
//!
//! The pool consumes these at its two external seams: bringing worker
//! processes up and down, and reading OS-level metrics for pids it owns.
//! Each trait is mockable for comprehensive testing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::ProcessMetrics;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::core::{Options, ProcessHandle};
use crate::error::SpawnError;

/// A worker process freshly produced by a [`Spawner`]
#[derive(Debug, Clone)]
pub struct SpawnedProcess {
    pub pid: u32,
    /// Endpoint sessions connect to
    pub address: SocketAddr,
    /// Max concurrent sessions the worker advertises; 0 means unbounded
    pub concurrency: u32,
    pub creation_time: DateTime<Utc>,
}

/// Brings application processes up and down
///
/// `spawn` must reproduce the full application environment described by the
/// options; the pool treats the result as opaque beyond the fields of
/// [`SpawnedProcess`]. Termination is the spawner's job too: the pool hands
/// back the [`ProcessHandle`] once it is detached and drained, and never
/// signals pids itself.
#[mockall::automock]
#[async_trait]
pub trait Spawner: Send + Sync {
    /// Start one worker for the given application
    async fn spawn(&self, options: Options) -> Result<SpawnedProcess, SpawnError>;

    /// Tear down a worker that left the pool
    async fn terminate(&self, process: Arc<ProcessHandle>);

    /// Retire idle spawn infrastructure (e.g. a preloader) for a group that
    /// has not spawned in a while
    async fn cleanup_idle(&self, app_group_name: String);
}

/// Batch source of per-pid OS metrics
///
/// Called outside the pool lock; pids missing from the result are treated
/// as dead and their processes are detached.
#[mockall::automock]
#[async_trait]
pub trait ProcessMetricsSource: Send + Sync {
    async fn collect(&self, pids: Vec<u32>) -> HashMap<u32, ProcessMetrics>;
}

/// [`ProcessMetricsSource`] backed by the OS process table
pub struct SystemMetricsSource {
    system: tokio::sync::Mutex<sysinfo::System>,
}

impl SystemMetricsSource {
    pub fn new() -> Self {
        use sysinfo::SystemExt;

        Self {
            system: tokio::sync::Mutex::new(sysinfo::System::new()),
        }
    }
}

impl Default for SystemMetricsSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessMetricsSource for SystemMetricsSource {
    async fn collect(&self, pids: Vec<u32>) -> HashMap<u32, ProcessMetrics> {
        use sysinfo::{Pid, PidExt, ProcessExt, SystemExt};

        let mut system = self.system.lock().await;
        let mut result = HashMap::with_capacity(pids.len());

        for pid in pids {
            let sys_pid = Pid::from_u32(pid);
            if !system.refresh_process(sys_pid) {
                // Process is gone; leaving it out of the map marks it dead.
                continue;
            }
            if let Some(process) = system.process(sys_pid) {
                result.insert(
                    pid,
                    ProcessMetrics {
                        cpu_percent: process.cpu_usage(),
                        rss_bytes: process.memory(),
                        uptime_secs: process.run_time(),
                    },
                );
            }
        }

        result
    }
}
