//! Worker process bookkeeping

use chrono::{DateTime, Utc};
use shared::{Gupid, ProcessMetrics};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

/// Immutable identity of a spawned worker, shared with live sessions
///
/// Sessions keep an `Arc` to this so a mid-request detach cannot free the
/// communication endpoint under the caller; the OS process itself is only
/// terminated once the handle is detached *and* its last session is gone.
#[derive(Debug)]
pub struct ProcessHandle {
    pub pid: u32,
    pub gupid: Gupid,
    pub app_group_name: String,
    pub address: SocketAddr,
    pub creation_time: DateTime<Utc>,

    /// Cleared when the process leaves its group
    attached: AtomicBool,

    /// Sessions currently holding this handle
    live_sessions: AtomicU32,

    /// Ensures the spawner is asked to tear the process down exactly once
    termination_claimed: AtomicBool,
}

impl ProcessHandle {
    pub(crate) fn new(
        pid: u32,
        gupid: Gupid,
        app_group_name: String,
        address: SocketAddr,
        creation_time: DateTime<Utc>,
    ) -> Self {
        Self {
            pid,
            gupid,
            app_group_name,
            address,
            creation_time,
            attached: AtomicBool::new(true),
            live_sessions: AtomicU32::new(0),
            termination_claimed: AtomicBool::new(false),
        }
    }

    /// Whether the process is still part of its group
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::SeqCst)
    }

    pub(crate) fn mark_detached(&self) {
        self.attached.store(false, Ordering::SeqCst);
    }

    pub(crate) fn session_opened(&self) {
        self.live_sessions.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns the number of sessions still holding the handle
    pub(crate) fn session_released(&self) -> u32 {
        self.live_sessions.fetch_sub(1, Ordering::SeqCst) - 1
    }

    /// True once the process is detached and no session can reach it anymore
    pub(crate) fn ready_for_termination(&self) -> bool {
        !self.is_attached() && self.live_sessions.load(Ordering::SeqCst) == 0
    }

    /// First caller wins the right to schedule the actual teardown
    pub(crate) fn claim_termination(&self) -> bool {
        !self.termination_claimed.swap(true, Ordering::SeqCst)
    }
}

/// Enable state of a process within its group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnabledState {
    /// Accepts new sessions
    Enabled,
    /// Draining; existing sessions finish, no new ones are routed to it
    Disabling,
    /// Drained and parked; eligible for eviction
    Disabled,
}

impl EnabledState {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnabledState::Enabled => "enabled",
            EnabledState::Disabling => "disabling",
            EnabledState::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessLifeStatus {
    Alive,
    ShutdownTriggered,
    Dead,
}

impl ProcessLifeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessLifeStatus::Alive => "alive",
            ProcessLifeStatus::ShutdownTriggered => "shutdown_triggered",
            ProcessLifeStatus::Dead => "dead",
        }
    }
}

/// Mutable per-process state, owned by a [`Group`] and only touched under
/// the pool lock
///
/// [`Group`]: crate::core::group::Group
#[derive(Debug)]
pub struct Process {
    handle: std::sync::Arc<ProcessHandle>,

    /// Max concurrent sessions; 0 means unbounded cooperative concurrency
    concurrency: u32,

    sessions: u32,
    processed: u64,
    enabled: EnabledState,
    life_status: ProcessLifeStatus,
    last_used: Instant,
    oob_work: bool,
    metrics: ProcessMetrics,
}

impl Process {
    pub(crate) fn new(handle: std::sync::Arc<ProcessHandle>, concurrency: u32) -> Self {
        Self {
            handle,
            concurrency,
            sessions: 0,
            processed: 0,
            enabled: EnabledState::Enabled,
            life_status: ProcessLifeStatus::Alive,
            last_used: Instant::now(),
            oob_work: false,
            metrics: ProcessMetrics::default(),
        }
    }

    pub fn handle(&self) -> &std::sync::Arc<ProcessHandle> {
        &self.handle
    }

    pub fn pid(&self) -> u32 {
        self.handle.pid
    }

    pub fn gupid(&self) -> &Gupid {
        &self.handle.gupid
    }

    pub fn sessions(&self) -> u32 {
        self.sessions
    }

    pub fn concurrency(&self) -> u32 {
        self.concurrency
    }

    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn enabled(&self) -> EnabledState {
        self.enabled
    }

    pub(crate) fn set_enabled(&mut self, state: EnabledState) {
        debug_assert!(
            state != EnabledState::Disabled || self.sessions == 0,
            "a disabled process must have no sessions"
        );
        self.enabled = state;
    }

    pub fn life_status(&self) -> ProcessLifeStatus {
        self.life_status
    }

    pub(crate) fn set_life_status(&mut self, status: ProcessLifeStatus) {
        self.life_status = status;
    }

    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub fn metrics(&self) -> &ProcessMetrics {
        &self.metrics
    }

    pub(crate) fn set_metrics(&mut self, metrics: ProcessMetrics) {
        self.metrics = metrics;
    }

    pub fn oob_work_active(&self) -> bool {
        self.oob_work
    }

    pub(crate) fn set_oob_work(&mut self, active: bool) {
        self.oob_work = active;
    }

    /// Whether a new session may be routed to this process right now
    pub fn can_accept(&self) -> bool {
        self.enabled == EnabledState::Enabled
            && self.life_status == ProcessLifeStatus::Alive
            && !self.oob_work
            && (self.concurrency == 0 || self.sessions < self.concurrency)
    }

    /// Load metric used to pick the least busy process
    ///
    /// Bounded processes compare by utilization, unbounded ones by raw
    /// session count; [`Group::route_session`] breaks ties with the
    /// round-robin cursor and `processed`.
    ///
    /// [`Group::route_session`]: crate::core::group::Group::route_session
    pub fn busyness(&self) -> u64 {
        if self.concurrency == 0 {
            self.sessions as u64
        } else {
            (self.sessions as u64 * 10_000) / self.concurrency as u64
        }
    }

    /// Account for a newly created session
    pub(crate) fn note_session_opened(&mut self) {
        debug_assert!(self.can_accept(), "session routed to a process that cannot accept");
        self.sessions += 1;
        self.last_used = Instant::now();
        self.handle.session_opened();
    }

    /// Account for a closed session; the group decides what follows
    pub(crate) fn note_session_closed(&mut self) {
        debug_assert!(self.sessions > 0, "session count underflow");
        self.sessions -= 1;
        self.processed += 1;
        self.last_used = Instant::now();
    }

    /// Whether the per-process request budget is exhausted
    pub(crate) fn wants_retirement(&self, max_requests: u64) -> bool {
        max_requests > 0 && self.processed >= max_requests
    }
}
