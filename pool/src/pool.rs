//! The pool supervisor
//!
//! Owns every [`Group`] and, through them, every worker process. One coarse
//! mutex (`state`) protects all of it. Every mutating entry point follows
//! the same discipline: take the lock, mutate, push deferred work into an
//! action buffer, verify invariants, release the lock, run the actions.
//! Actions may call back into the pool; they take the lock themselves.

use shared::{Gupid, PoolEvent};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;

use crate::config::PoolConfig;
use crate::core::group::{DisableOutcome, Group, GroupLifeStatus};
use crate::core::process::{EnabledState, Process, ProcessHandle, ProcessLifeStatus};
use crate::core::{Options, RestartMethod, Session, SpawnMethod};
use crate::error::{DisableResult, PoolError, PoolResult, SpawnError};
use crate::inspect::{pool_snapshot, render_inspect, render_xml, GroupSnapshot, InspectOptions, PoolSnapshot, ProcessSnapshot};
use crate::services::debug::DebugSupport;
use crate::services::{gc, metrics};
use crate::traits::{ProcessMetricsSource, SpawnedProcess, Spawner, SystemMetricsSource};

/// Invoked exactly once per `get`, after the pool lock is released
pub type GetCallback = Box<dyn FnOnce(PoolResult<Session>) + Send + 'static>;

/// Invoked when a deferred disable resolves
pub type DisableCallback = Box<dyn FnOnce(DisableResult) + Send + 'static>;

/// Deferred work captured under the lock, run after release
pub(crate) type Action = Box<dyn FnOnce() + Send + 'static>;

pub(crate) fn run_actions(actions: Vec<Action>) {
    for action in actions {
        action();
    }
}

/// A queued `get` request, parked either on a group or on the pool itself
pub(crate) struct Waiter {
    pub(crate) ticket: u64,
    pub(crate) options: Options,
    pub(crate) callback: GetCallback,
    pub(crate) deadline: Instant,
    pub(crate) enqueued_at: Instant,
}

/// Opaque handle for canceling a pending `get`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GetTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolLifeStatus {
    Alive,
    /// Background services stopped, all waiters failed; sessions drain out
    PreparedForShutdown,
    ShuttingDown,
    ShutDown,
}

impl PoolLifeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolLifeStatus::Alive => "alive",
            PoolLifeStatus::PreparedForShutdown => "prepared_for_shutdown",
            PoolLifeStatus::ShuttingDown => "shutting_down",
            PoolLifeStatus::ShutDown => "shut_down",
        }
    }
}

/// Everything behind the pool's `Arc`: the locked state plus the services
/// and channels that outlive any single lock hold
pub(crate) struct PoolShared {
    pub(crate) state: Mutex<PoolInner>,
    pub(crate) spawner: Arc<dyn Spawner>,
    pub(crate) metrics_source: Arc<dyn ProcessMetricsSource>,
    pub(crate) runtime: tokio::runtime::Handle,
    /// Wakes the garbage collector out of its timed sleep
    pub(crate) gc_notify: Notify,
    /// Pulsed once at shutdown; both background services watch it
    pub(crate) shutdown_tx: watch::Sender<bool>,
    next_ticket: AtomicU64,
}

impl PoolShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.state.lock().expect("pool state mutex poisoned")
    }

    fn next_ticket(&self) -> u64 {
        self.next_ticket.fetch_add(1, Ordering::Relaxed)
    }
}

impl std::fmt::Debug for PoolShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PoolShared").finish_non_exhaustive()
    }
}

/// All mutable pool state; only ever touched while holding the mutex
pub(crate) struct PoolInner {
    pub(crate) max: u32,
    pub(crate) max_idle_time: std::time::Duration,
    pub(crate) preloader_idle_time: std::time::Duration,
    pub(crate) self_checking: bool,
    pub(crate) expensive_checks: bool,
    pub(crate) recreate_shut_down_groups: bool,

    pub(crate) groups: HashMap<String, Group>,

    /// `get` requests whose group does not exist yet and cannot be created
    /// because the pool is at full capacity
    pub(crate) get_waitlist: VecDeque<Waiter>,

    pub(crate) life_status: PoolLifeStatus,

    /// Guards against re-entering the drain pass from inside itself
    rebalancing: bool,

    /// Set when `set_max` dropped the ceiling below current usage; natural
    /// churn brings usage back down, and until it does the capacity
    /// invariant is deliberately overcommitted
    max_overcommit: bool,

    /// Interrupted (via the shutdown channel) and joined on destroy
    pub(crate) interruptable_tasks: Vec<JoinHandle<()>>,
    /// Only joined on destroy: spawn and teardown tasks in flight
    pub(crate) non_interruptable_tasks: Vec<JoinHandle<()>>,

    pub(crate) debug: Option<DebugSupport>,
}

impl PoolInner {
    pub(crate) fn new(config: &PoolConfig) -> Self {
        Self {
            max: config.max,
            max_idle_time: config.max_idle_time,
            preloader_idle_time: config.preloader_idle_time,
            self_checking: config.self_checking,
            expensive_checks: config.expensive_checks,
            recreate_shut_down_groups: config.recreate_shut_down_groups,
            groups: HashMap::new(),
            get_waitlist: VecDeque::new(),
            life_status: PoolLifeStatus::Alive,
            rebalancing: false,
            max_overcommit: false,
            interruptable_tasks: Vec::new(),
            non_interruptable_tasks: Vec::new(),
            debug: None,
        }
    }

    /// Live plus being-spawned processes across all groups
    pub(crate) fn capacity_used(&self) -> u32 {
        self.groups.values().map(|g| g.capacity_used()).sum()
    }

    pub(crate) fn at_full_capacity(&self) -> bool {
        self.capacity_used() >= self.max
    }

    pub(crate) fn publish(&self, event: PoolEvent) {
        if let Some(debug) = &self.debug {
            debug.publish(event);
        }
    }

    /// Name of the group currently holding the given process
    pub(crate) fn group_of_process(&self, gupid: &Gupid) -> Option<String> {
        self.groups
            .iter()
            .find(|(_, g)| g.list_of(gupid).is_some())
            .map(|(name, _)| name.clone())
    }

    pub(crate) fn gupid_of_pid(&self, pid: u32) -> Option<Gupid> {
        self.groups
            .values()
            .flat_map(|g| g.processes())
            .find(|p| p.pid() == pid)
            .map(|p| p.gupid().clone())
    }
}

/// The application process pool supervisor
///
/// Cheap to clone; all clones share one state. Must be created inside a
/// tokio runtime, which it captures for its background services and
/// deferred spawn work.
#[derive(Clone, Debug)]
pub struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    /// Create a pool with the OS-backed metrics source
    pub fn new(config: PoolConfig, spawner: Arc<dyn Spawner>) -> PoolResult<Self> {
        Self::with_metrics_source(config, spawner, Arc::new(SystemMetricsSource::new()))
    }

    /// Create a pool with an injected metrics source (tests use a mock)
    pub fn with_metrics_source(
        config: PoolConfig,
        spawner: Arc<dyn Spawner>,
        metrics_source: Arc<dyn ProcessMetricsSource>,
    ) -> PoolResult<Self> {
        config.validate()?;

        let (shutdown_tx, _) = watch::channel(false);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolInner::new(&config)),
            spawner,
            metrics_source,
            runtime: tokio::runtime::Handle::current(),
            gc_notify: Notify::new(),
            shutdown_tx,
            next_ticket: AtomicU64::new(1),
        });

        let gc_task = gc::spawn_garbage_collector(shared.clone(), shared.shutdown_tx.subscribe());
        let metrics_task = metrics::spawn_metrics_collector(
            shared.clone(),
            shared.shutdown_tx.subscribe(),
            config.metrics_interval,
        );
        {
            let mut inner = shared.lock();
            inner.interruptable_tasks.push(gc_task);
            inner.interruptable_tasks.push(metrics_task);
        }

        tracing::info!(max = config.max, "🚀 application pool initialized");
        Ok(Self { shared })
    }

    /// Attach a debug mailbox and return its receiving end
    ///
    /// Lifecycle events are posted with `try_send`; a full mailbox drops
    /// events rather than stalling the pool.
    pub fn enable_debug_events(&self, capacity: usize) -> tokio::sync::mpsc::Receiver<PoolEvent> {
        let (support, rx) = DebugSupport::new(capacity);
        self.shared.lock().debug = Some(support);
        rx
    }

    // ---------------------------------------------------------------
    // Admission
    // ---------------------------------------------------------------

    /// Request a session; `callback` fires exactly once, after the lock is
    /// released, from whatever thread resolves the request
    pub fn async_get(&self, options: &Options, callback: GetCallback) -> GetTicket {
        let ticket = self.shared.next_ticket();
        let now = Instant::now();
        let waiter = Waiter {
            ticket,
            options: options.clone(),
            callback,
            deadline: now + options.start_timeout,
            enqueued_at: now,
        };

        let mut actions = Vec::new();
        {
            let mut inner = self.shared.lock();
            Self::do_get(&self.shared, &mut inner, waiter, &mut actions);
            Self::finalize(&mut inner);
        }
        run_actions(actions);

        // fold the new waiter's deadline into the collector's next wake-up
        self.shared.gc_notify.notify_one();
        GetTicket(ticket)
    }

    /// Synchronous admission: resolves once a session is assigned or the
    /// request fails or times out
    pub async fn get(&self, options: &Options) -> PoolResult<Session> {
        let (tx, rx) = oneshot::channel();
        self.async_get(
            options,
            Box::new(move |result| {
                if let Err(unclaimed) = tx.send(result) {
                    // The caller gave up waiting; an assigned session goes
                    // straight back to the pool on drop.
                    drop(unclaimed);
                }
            }),
        );

        match rx.await {
            Ok(result) => result,
            Err(_) => Err(PoolError::PoolShuttingDown),
        }
    }

    /// Remove a still-pending `get` from whichever queue holds it
    ///
    /// Returns `false` when the request already resolved; its callback has
    /// fired (or is about to) with the real result in that case.
    pub fn cancel_get(&self, ticket: GetTicket) -> bool {
        let mut actions = Vec::new();
        let found = {
            let mut inner = self.shared.lock();
            let mut waiter = None;
            if let Some(pos) = inner.get_waitlist.iter().position(|w| w.ticket == ticket.0) {
                waiter = inner.get_waitlist.remove(pos);
            } else {
                for group in inner.groups.values_mut() {
                    if let Some(found) = group.remove_waiter_by_ticket(ticket.0) {
                        waiter = Some(found);
                        break;
                    }
                }
            }
            match waiter {
                Some(waiter) => {
                    Self::fail_waiter(waiter, PoolError::RequestCanceled, &mut actions);
                    Self::finalize(&mut inner);
                    true
                }
                None => false,
            }
        };
        run_actions(actions);
        found
    }

    // ---------------------------------------------------------------
    // Group manipulation
    // ---------------------------------------------------------------

    /// Find the group for these options, creating an empty one if needed
    pub fn find_or_create_group(&self, options: &Options) -> GroupSnapshot {
        let mut actions = Vec::new();
        let snapshot = {
            let mut inner = self.shared.lock();
            if !inner.groups.contains_key(options.group_key()) {
                Self::create_group(&self.shared, &mut inner, options, &mut actions);
            }
            let snapshot = inner.groups[options.group_key()].snapshot(true);
            Self::finalize(&mut inner);
            snapshot
        };
        run_actions(actions);
        snapshot
    }

    pub fn find_group_by_secret(&self, secret: &shared::GroupSecret) -> Option<GroupSnapshot> {
        let inner = self.shared.lock();
        inner
            .groups
            .values()
            .find(|g| g.secret() == secret)
            .map(|g| g.snapshot(true))
    }

    pub fn detach_group_by_name(&self, name: &str) -> bool {
        let mut actions = Vec::new();
        let detached = {
            let mut inner = self.shared.lock();
            let detached = Self::detach_group_unlocked(&self.shared, &mut inner, name, &mut actions);
            if detached {
                Self::rebalance(&self.shared, &mut inner, &mut actions);
            }
            Self::finalize(&mut inner);
            detached
        };
        run_actions(actions);
        detached
    }

    pub fn detach_group_by_secret(&self, secret: &shared::GroupSecret) -> bool {
        let name = {
            let inner = self.shared.lock();
            inner
                .groups
                .values()
                .find(|g| g.secret() == secret)
                .map(|g| g.name().to_string())
        };
        match name {
            Some(name) => self.detach_group_by_name(&name),
            None => false,
        }
    }

    /// Restart one group; `method` falls back to the group's configured
    /// restart method
    pub fn restart_group_by_name(&self, name: &str, method: Option<RestartMethod>) -> bool {
        let mut actions = Vec::new();
        let restarted = {
            let mut inner = self.shared.lock();
            let restarted = Self::restart_group_unlocked(&self.shared, &mut inner, name, method, &mut actions);
            Self::finalize(&mut inner);
            restarted
        };
        run_actions(actions);
        restarted
    }

    /// Restart every group rooted at `app_root`; returns how many
    pub fn restart_groups_by_app_root(&self, app_root: &str, method: Option<RestartMethod>) -> usize {
        let names: Vec<String> = {
            let inner = self.shared.lock();
            inner
                .groups
                .values()
                .filter(|g| g.options().app_root == app_root)
                .map(|g| g.name().to_string())
                .collect()
        };
        names
            .iter()
            .filter(|name| self.restart_group_by_name(name, method))
            .count()
    }

    // ---------------------------------------------------------------
    // Process manipulation
    // ---------------------------------------------------------------

    pub fn detach_process_by_gupid(&self, gupid: &Gupid) -> bool {
        let mut actions = Vec::new();
        let detached = {
            let mut inner = self.shared.lock();
            let detached = Self::detach_process_unlocked(&self.shared, &mut inner, gupid, &mut actions);
            if detached {
                Self::rebalance(&self.shared, &mut inner, &mut actions);
            }
            Self::finalize(&mut inner);
            detached
        };
        run_actions(actions);
        detached
    }

    pub fn detach_process_by_pid(&self, pid: u32) -> bool {
        let gupid = {
            let inner = self.shared.lock();
            inner.gupid_of_pid(pid)
        };
        match gupid {
            Some(gupid) => self.detach_process_by_gupid(&gupid),
            None => false,
        }
    }

    /// Disable a process and wait for it to drain
    ///
    /// Resolves to [`DisableResult::Success`] once the last session closes,
    /// or [`DisableResult::Canceled`] if the process is detached first.
    pub async fn disable_process(&self, gupid: &Gupid) -> DisableResult {
        let (tx, rx) = oneshot::channel();
        let immediate = self.disable_process_with_callback(
            gupid,
            Some(Box::new(move |result| {
                let _ = tx.send(result);
            })),
        );
        if immediate != DisableResult::Deferred {
            return immediate;
        }
        rx.await.unwrap_or(DisableResult::Canceled)
    }

    /// Disable a process without blocking
    ///
    /// Returns [`DisableResult::Deferred`] when the process still has live
    /// sessions; `callback` then fires once draining completes (or the
    /// process is detached). For any other result the callback is dropped
    /// unused.
    pub fn disable_process_with_callback(
        &self,
        gupid: &Gupid,
        callback: Option<DisableCallback>,
    ) -> DisableResult {
        let mut actions = Vec::new();
        let result = {
            let mut inner = self.shared.lock();
            let result = Self::do_disable(&self.shared, &mut inner, gupid, callback, &mut actions);
            Self::finalize(&mut inner);
            result
        };
        run_actions(actions);
        result
    }

    /// Bring a disabled (or draining) process back into rotation
    pub fn enable_process(&self, gupid: &Gupid) -> bool {
        let mut actions = Vec::new();
        let enabled = {
            let mut inner = self.shared.lock();
            let enabled = Self::do_enable(&self.shared, &mut inner, gupid, &mut actions);
            Self::finalize(&mut inner);
            enabled
        };
        run_actions(actions);
        enabled
    }

    /// Route new sessions away from a process while it performs out-of-band
    /// maintenance
    pub fn start_oob_work(&self, gupid: &Gupid) -> bool {
        let mut inner = self.shared.lock();
        let Some(name) = inner.group_of_process(gupid) else {
            return false;
        };
        let started = inner
            .groups
            .get_mut(&name)
            .and_then(|g| g.process_mut(gupid))
            .map(|p| {
                if p.enabled() == EnabledState::Enabled && !p.oob_work_active() {
                    p.set_oob_work(true);
                    true
                } else {
                    false
                }
            })
            .unwrap_or(false);
        Self::finalize(&mut inner);
        started
    }

    /// End an out-of-band work window and hand queued work to the process
    pub fn finish_oob_work(&self, gupid: &Gupid) -> bool {
        let mut actions = Vec::new();
        let finished = {
            let mut inner = self.shared.lock();
            let Some(name) = inner.group_of_process(gupid) else {
                return false;
            };
            let finished = inner
                .groups
                .get_mut(&name)
                .and_then(|g| g.process_mut(gupid))
                .map(|p| {
                    let was_active = p.oob_work_active();
                    p.set_oob_work(false);
                    was_active
                })
                .unwrap_or(false);
            if finished {
                Self::assign_sessions_in_group(&self.shared, &mut inner, &name, &mut actions);
            }
            Self::finalize(&mut inner);
            finished
        };
        run_actions(actions);
        finished
    }

    // ---------------------------------------------------------------
    // Tunables
    // ---------------------------------------------------------------

    /// Raise or lower the global process ceiling
    ///
    /// Raising it drains the wait-lists immediately; lowering it below the
    /// current usage detaches nothing — natural churn brings usage down.
    pub fn set_max(&self, max: u32) {
        let mut actions = Vec::new();
        {
            let mut inner = self.shared.lock();
            let raised = max > inner.max;
            inner.max = max;
            if raised {
                Self::rebalance(&self.shared, &mut inner, &mut actions);
            } else if inner.capacity_used() > max {
                inner.max_overcommit = true;
            }
            Self::finalize(&mut inner);
        }
        run_actions(actions);
        self.shared.gc_notify.notify_one();
    }

    pub fn set_max_idle_time(&self, max_idle_time: std::time::Duration) {
        self.shared.lock().max_idle_time = max_idle_time;
        self.shared.gc_notify.notify_one();
    }

    pub fn enable_self_checking(&self, enabled: bool) {
        self.shared.lock().self_checking = enabled;
    }

    // ---------------------------------------------------------------
    // State inspection
    // ---------------------------------------------------------------

    pub fn capacity_used(&self) -> u32 {
        self.shared.lock().capacity_used()
    }

    pub fn at_full_capacity(&self) -> bool {
        self.shared.lock().at_full_capacity()
    }

    pub fn get_process_count(&self) -> u32 {
        let inner = self.shared.lock();
        inner.groups.values().map(|g| g.process_count()).sum()
    }

    pub fn get_group_count(&self) -> u32 {
        self.shared.lock().groups.len() as u32
    }

    pub fn is_spawning(&self) -> bool {
        let inner = self.shared.lock();
        inner.groups.values().any(|g| g.is_spawning())
    }

    pub fn life_status(&self) -> PoolLifeStatus {
        self.shared.lock().life_status
    }

    pub fn get_processes(&self) -> Vec<ProcessSnapshot> {
        let inner = self.shared.lock();
        let mut processes: Vec<ProcessSnapshot> = inner
            .groups
            .values()
            .flat_map(|g| g.processes().map(|p| p.snapshot(g.name())))
            .collect();
        processes.sort_by_key(|p| p.pid);
        processes
    }

    pub fn find_process_by_gupid(&self, gupid: &Gupid) -> Option<ProcessSnapshot> {
        let inner = self.shared.lock();
        inner.groups.values().find_map(|g| {
            g.processes()
                .find(|p| p.gupid() == gupid)
                .map(|p| p.snapshot(g.name()))
        })
    }

    pub fn find_process_by_pid(&self, pid: u32) -> Option<ProcessSnapshot> {
        let inner = self.shared.lock();
        inner.groups.values().find_map(|g| {
            g.processes()
                .find(|p| p.pid() == pid)
                .map(|p| p.snapshot(g.name()))
        })
    }

    /// Full structural snapshot of the pool
    pub fn snapshot(&self, include_secrets: bool) -> PoolSnapshot {
        let inner = self.shared.lock();
        pool_snapshot(&inner, include_secrets)
    }

    /// Human-readable state dump
    pub fn inspect(&self, options: &InspectOptions) -> String {
        render_inspect(&self.snapshot(false), options)
    }

    /// Structured XML state dump
    pub fn to_xml(&self, include_secrets: bool) -> String {
        render_xml(&self.snapshot(include_secrets))
    }

    // ---------------------------------------------------------------
    // Shutdown
    // ---------------------------------------------------------------

    /// Stop background services, fail every queued waiter, and begin
    /// draining the groups; no session is handed out after this returns
    pub fn prepare_for_shutdown(&self) {
        let mut actions = Vec::new();
        {
            let mut inner = self.shared.lock();
            if inner.life_status != PoolLifeStatus::Alive {
                return;
            }
            inner.life_status = PoolLifeStatus::PreparedForShutdown;
            tracing::info!("🛑 preparing application pool for shutdown");
            inner.publish(PoolEvent::ShutdownPrepared);
            let _ = self.shared.shutdown_tx.send(true);
            self.shared.gc_notify.notify_one();

            // fail everything that is still waiting
            let pool_waiters: Vec<Waiter> = inner.get_waitlist.drain(..).collect();
            for waiter in pool_waiters {
                Self::fail_waiter(waiter, PoolError::PoolShuttingDown, &mut actions);
            }

            let names: Vec<String> = inner.groups.keys().cloned().collect();
            let mut idle = Vec::new();
            for name in &names {
                let Some(group) = inner.groups.get_mut(name) else {
                    continue;
                };
                group.life_status = GroupLifeStatus::ShuttingDown;
                let waiters: Vec<Waiter> = group.get_waitlist.drain(..).collect();
                for callback in group.take_all_disable_waiters() {
                    actions.push(Box::new(move || callback(DisableResult::Canceled)));
                }
                for process in group.processes_mut() {
                    process.set_life_status(ProcessLifeStatus::ShutdownTriggered);
                    if process.sessions() == 0 {
                        idle.push(process.gupid().clone());
                    }
                }
                for waiter in waiters {
                    Self::fail_waiter(waiter, PoolError::PoolShuttingDown, &mut actions);
                }
            }
            for gupid in idle {
                Self::detach_process_unlocked(&self.shared, &mut inner, &gupid, &mut actions);
            }
            Self::finalize(&mut inner);
        }
        run_actions(actions);
    }

    /// Tear the pool down: interrupt and join both task groups, force-detach
    /// whatever is left
    pub async fn destroy(&self) {
        self.prepare_for_shutdown();

        let mut actions = Vec::new();
        let (interruptable, non_interruptable) = {
            let mut inner = self.shared.lock();
            inner.life_status = PoolLifeStatus::ShuttingDown;
            let names: Vec<String> = inner.groups.keys().cloned().collect();
            for name in names {
                Self::detach_group_unlocked(&self.shared, &mut inner, &name, &mut actions);
            }
            (
                std::mem::take(&mut inner.interruptable_tasks),
                std::mem::take(&mut inner.non_interruptable_tasks),
            )
        };
        run_actions(actions);

        // interruptable services saw the shutdown signal in
        // prepare_for_shutdown and exit on their own
        for task in interruptable {
            let _ = task.await;
        }
        for task in non_interruptable {
            let _ = task.await;
        }

        self.shared.lock().life_status = PoolLifeStatus::ShutDown;
        tracing::info!("application pool destroyed");
    }

    // ---------------------------------------------------------------
    // Session plumbing (called from Session and services)
    // ---------------------------------------------------------------

    pub(crate) fn session_closed(shared: &Arc<PoolShared>, handle: &Arc<ProcessHandle>) {
        handle.session_released();
        let mut actions: Vec<Action> = Vec::new();
        {
            let mut inner = shared.lock();
            let name = handle.app_group_name.clone();
            let gupid = handle.gupid.clone();
            let pool_alive = inner.life_status == PoolLifeStatus::Alive;

            let mut tracked = false;
            let mut drained_disabling = false;
            let mut retire = false;
            if let Some(group) = inner.groups.get_mut(&name) {
                let max_requests = group.options().max_requests;
                if let Some(process) = group.process_mut(&gupid) {
                    tracked = true;
                    process.note_session_closed();
                    drained_disabling =
                        process.enabled() == EnabledState::Disabling && process.sessions() == 0;
                    retire = process.wants_retirement(max_requests)
                        || (!pool_alive && process.sessions() == 0);
                }
                if drained_disabling {
                    group.finish_disable(&gupid);
                    for callback in group.take_disable_waiters(&gupid) {
                        actions.push(Box::new(move || callback(DisableResult::Success)));
                    }
                }
            }

            if tracked {
                inner.publish(PoolEvent::SessionClosed { gupid: gupid.clone() });
                if drained_disabling {
                    inner.publish(PoolEvent::ProcessDisabled {
                        group: name.clone(),
                        gupid: gupid.clone(),
                    });
                }
                if retire {
                    Self::detach_process_unlocked(shared, &mut inner, &gupid, &mut actions);
                } else {
                    Self::assign_sessions_in_group(shared, &mut inner, &name, &mut actions);
                }
                // an idle process is an eviction candidate, so the global
                // queue may make progress now
                Self::rebalance(shared, &mut inner, &mut actions);
            }

            Self::schedule_termination(shared, &mut actions, handle.clone());
            Self::finalize(&mut inner);
        }
        run_actions(actions);
    }

    pub(crate) fn spawn_completed(
        shared: &Arc<PoolShared>,
        name: &str,
        result: Result<SpawnedProcess, SpawnError>,
    ) {
        let mut actions = Vec::new();
        {
            let mut inner = shared.lock();
            match result {
                Ok(spawned) => Self::handle_spawn_success(shared, &mut inner, name, spawned, &mut actions),
                Err(error) => Self::handle_spawn_failure(shared, &mut inner, name, error, &mut actions),
            }
            Self::finalize(&mut inner);
        }
        run_actions(actions);
        shared.gc_notify.notify_one();
    }

    // ---------------------------------------------------------------
    // Scheduler internals. All of these run under the lock and defer
    // side effects into `actions`.
    // ---------------------------------------------------------------

    pub(crate) fn fail_waiter(waiter: Waiter, error: PoolError, actions: &mut Vec<Action>) {
        let callback = waiter.callback;
        actions.push(Box::new(move || callback(Err(error))));
    }

    fn do_get(shared: &Arc<PoolShared>, inner: &mut PoolInner, waiter: Waiter, actions: &mut Vec<Action>) {
        if inner.life_status != PoolLifeStatus::Alive {
            Self::fail_waiter(waiter, PoolError::PoolShuttingDown, actions);
            return;
        }
        let name = waiter.options.app_group_name.clone();
        let recreate = inner.recreate_shut_down_groups;

        if let Some(group) = inner.groups.get_mut(&name) {
            if group.life_status != GroupLifeStatus::Alive {
                if recreate {
                    group.life_status = GroupLifeStatus::Alive;
                    tracing::debug!(group = %name, "resurrecting shut-down group for new request");
                } else {
                    Self::fail_waiter(waiter, PoolError::GroupShuttingDown { group: name }, actions);
                    return;
                }
            }
            Self::group_admit(shared, inner, &name, waiter, actions);
            return;
        }

        if inner.capacity_used() < inner.max {
            Self::create_group(shared, inner, &waiter.options, actions);
            Self::group_admit(shared, inner, &name, waiter, actions);
            return;
        }

        // At full capacity. Trash an idle process elsewhere if one can be
        // spared; older pool-level waiters get first claim on the freed
        // capacity, so re-check before taking it.
        if let Some(victim) = Self::find_best_process_to_trash(inner, None) {
            Self::detach_process_unlocked(shared, inner, &victim, actions);
            Self::rebalance(shared, inner, actions);
            if inner.groups.contains_key(&name) {
                Self::group_admit(shared, inner, &name, waiter, actions);
                return;
            }
            if inner.capacity_used() < inner.max {
                Self::create_group(shared, inner, &waiter.options, actions);
                Self::group_admit(shared, inner, &name, waiter, actions);
                return;
            }
        }

        // Park on the pool-level wait-list. Only requests without a live
        // group ever land here.
        let queue_limit = waiter.options.max_wait_queue_size;
        if queue_limit > 0 && inner.get_waitlist.len() >= queue_limit {
            let queue_size = inner.get_waitlist.len();
            Self::fail_waiter(waiter, PoolError::AtFullCapacity { queue_size }, actions);
        } else {
            inner.get_waitlist.push_back(waiter);
        }
    }

    fn create_group(shared: &Arc<PoolShared>, inner: &mut PoolInner, options: &Options, actions: &mut Vec<Action>) {
        let name = options.app_group_name.clone();
        inner.groups.insert(name.clone(), Group::new(options.clone()));
        tracing::info!(group = %name, app_root = %options.app_root, "created application group");
        inner.publish(PoolEvent::GroupCreated { group: name.clone() });
        Self::restore_min_processes(shared, inner, &name, actions);
    }

    /// Serve the waiter from an enabled process or queue it on the group
    fn group_admit(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        name: &str,
        waiter: Waiter,
        actions: &mut Vec<Action>,
    ) {
        let mut waiter = Some(waiter);
        let mut served: Option<(Arc<ProcessHandle>, Gupid)> = None;
        let mut queued = false;
        {
            let group = match inner.groups.get_mut(name) {
                Some(group) => group,
                None => {
                    let waiter = waiter.take().expect("waiter not yet consumed");
                    Self::fail_waiter(
                        waiter,
                        PoolError::GroupShuttingDown { group: name.to_string() },
                        actions,
                    );
                    return;
                }
            };
            if let Some(process) = group.route_session() {
                process.note_session_opened();
                served = Some((process.handle().clone(), process.gupid().clone()));
            } else {
                let waiter = waiter.take().expect("waiter not yet consumed");
                let queue_limit = waiter.options.max_wait_queue_size;
                if queue_limit > 0 && group.get_waitlist.len() >= queue_limit {
                    let queue_size = group.get_waitlist.len();
                    Self::fail_waiter(waiter, PoolError::AtFullCapacity { queue_size }, actions);
                } else {
                    group.get_waitlist.push_back(waiter);
                    queued = true;
                }
            }
        }

        if let Some((handle, gupid)) = served {
            let session = Session::new(handle, Arc::downgrade(shared));
            inner.publish(PoolEvent::SessionOpened { gupid });
            let waiter = waiter.take().expect("waiter not yet consumed");
            let callback = waiter.callback;
            actions.push(Box::new(move || callback(Ok(session))));
        } else if queued {
            Self::ensure_spawn_for_waiters(shared, inner, name, actions);
        }
    }

    /// Kick off a spawn when queued waiters have no process to wait for
    fn ensure_spawn_for_waiters(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        name: &str,
        actions: &mut Vec<Action>,
    ) {
        let queue_deadlocked = {
            let Some(group) = inner.groups.get(name) else {
                return;
            };
            if group.life_status != GroupLifeStatus::Alive
                || group.is_restarting()
                || group.get_waitlist.is_empty()
                || group.has_free_capacity()
                || group.is_spawning()
                || !group.options().allows_process_count(group.capacity_used())
            {
                return;
            }
            group.enabled_count() == 0
        };

        if inner.capacity_used() < inner.max {
            Self::initiate_spawn(shared, inner, name, actions);
        } else if queue_deadlocked {
            // Without a process this queue can never drain; free capacity
            // from another group.
            if Self::force_free_capacity(shared, inner, Some(name), actions)
                && inner.capacity_used() < inner.max
            {
                Self::initiate_spawn(shared, inner, name, actions);
            }
        }
    }

    fn initiate_spawn(shared: &Arc<PoolShared>, inner: &mut PoolInner, name: &str, actions: &mut Vec<Action>) {
        if inner.life_status != PoolLifeStatus::Alive {
            return;
        }
        let options = {
            let Some(group) = inner.groups.get_mut(name) else {
                return;
            };
            group.processes_being_spawned += 1;
            group.last_spawn_at = Instant::now();
            group.preloader_cleaned = false;
            group.options().clone()
        };
        inner.publish(PoolEvent::SpawnStarted { group: name.to_string() });
        tracing::debug!(group = %name, "requesting a new application process");

        let shared = shared.clone();
        let group_name = name.to_string();
        actions.push(Box::new(move || {
            let spawner = shared.spawner.clone();
            let runtime = shared.runtime.clone();
            let registrar = shared.clone();
            let task = runtime.spawn(async move {
                let result = spawner.spawn(options).await;
                Pool::spawn_completed(&shared, &group_name, result);
            });
            Pool::register_cleanup_task(&registrar, task);
        }));
    }

    fn handle_spawn_success(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        name: &str,
        spawned: SpawnedProcess,
        actions: &mut Vec<Action>,
    ) {
        let discard = |spawned: &SpawnedProcess| {
            let handle = Arc::new(ProcessHandle::new(
                spawned.pid,
                Gupid::new(),
                name.to_string(),
                spawned.address,
                spawned.creation_time,
            ));
            handle.mark_detached();
            handle
        };

        // the group may have been detached while the spawn was in flight
        let Some(group) = inner.groups.get_mut(name) else {
            let handle = discard(&spawned);
            Self::schedule_termination(shared, actions, handle);
            return;
        };
        group.processes_being_spawned = group.processes_being_spawned.saturating_sub(1);

        if group.life_status != GroupLifeStatus::Alive {
            let gone = group.processes_being_spawned == 0;
            let handle = discard(&spawned);
            Self::schedule_termination(shared, actions, handle);
            if gone {
                inner.groups.remove(name);
                inner.publish(PoolEvent::GroupDetached { group: name.to_string() });
            }
            Self::rebalance(shared, inner, actions);
            return;
        }

        let gupid = Gupid::new();
        let handle = Arc::new(ProcessHandle::new(
            spawned.pid,
            gupid.clone(),
            name.to_string(),
            spawned.address,
            spawned.creation_time,
        ));
        group.insert_spawned(Process::new(handle, spawned.concurrency));
        let restart_victim = if group.is_restarting() {
            group.take_next_restart_victim()
        } else {
            None
        };

        inner.publish(PoolEvent::SpawnSucceeded {
            group: name.to_string(),
            gupid: gupid.clone(),
            pid: spawned.pid,
        });
        tracing::info!(group = %name, pid = spawned.pid, gupid = %gupid, "application process is ready");

        // rolling restart: each arrival retires one old-generation process
        if let Some(victim) = restart_victim {
            Self::detach_process_unlocked(shared, inner, &victim, actions);
        }
        let mut restart_done = false;
        if let Some(group) = inner.groups.get_mut(name) {
            if group.is_restarting() && group.restart_old.is_empty() {
                group.restarting = false;
                restart_done = true;
            }
        }
        if restart_done {
            inner.publish(PoolEvent::RestartCompleted { group: name.to_string() });
            tracing::info!(group = %name, "rolling restart finished");
        }

        Self::assign_sessions_in_group(shared, inner, name, actions);

        // keep spawning while this group still needs processes
        let more = {
            let Some(group) = inner.groups.get(name) else {
                return;
            };
            let below_min =
                group.enabled_count() + group.processes_being_spawned < group.options().min_processes;
            let waiters_unserved = !group.get_waitlist.is_empty() && !group.has_free_capacity();
            let rolling_pending = group.is_restarting() && !group.restart_old.is_empty();
            (below_min || waiters_unserved || rolling_pending)
                && !group.is_spawning()
                && group.options().allows_process_count(group.capacity_used())
        };
        if more && inner.capacity_used() < inner.max {
            Self::initiate_spawn(shared, inner, name, actions);
        }

        // a fresh idle process is an eviction candidate for the global queue
        Self::rebalance(shared, inner, actions);
    }

    fn handle_spawn_failure(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        name: &str,
        error: SpawnError,
        actions: &mut Vec<Action>,
    ) {
        tracing::warn!(group = %name, error = %error, "process spawn failed");
        inner.publish(PoolEvent::SpawnFailed {
            group: name.to_string(),
            error: error.to_string(),
        });

        let (group_gone, waiters) = {
            let Some(group) = inner.groups.get_mut(name) else {
                return;
            };
            group.processes_being_spawned = group.processes_being_spawned.saturating_sub(1);
            if group.life_status != GroupLifeStatus::Alive {
                (group.processes_being_spawned == 0, Vec::new())
            } else {
                // the failure is surfaced to everyone currently queued here
                (false, group.get_waitlist.drain(..).collect::<Vec<Waiter>>())
            }
        };
        if group_gone {
            inner.groups.remove(name);
            inner.publish(PoolEvent::GroupDetached { group: name.to_string() });
        }
        for waiter in waiters {
            Self::fail_waiter(waiter, PoolError::Spawn(error.clone()), actions);
        }

        // the reserved capacity is free again
        Self::rebalance(shared, inner, actions);
    }

    /// Hand queued waiters to whatever enabled capacity the group has
    fn assign_sessions_in_group(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        name: &str,
        actions: &mut Vec<Action>,
    ) {
        let mut opened = Vec::new();
        loop {
            let Some(group) = inner.groups.get_mut(name) else {
                break;
            };
            if group.get_waitlist.is_empty() {
                break;
            }
            let Some(process) = group.route_session() else {
                break;
            };
            process.note_session_opened();
            let handle = process.handle().clone();
            let gupid = process.gupid().clone();
            let waiter = group.get_waitlist.pop_front().expect("waitlist checked non-empty");
            let session = Session::new(handle, Arc::downgrade(shared));
            let callback = waiter.callback;
            actions.push(Box::new(move || callback(Ok(session))));
            opened.push(gupid);
        }
        for gupid in opened {
            inner.publish(PoolEvent::SessionOpened { gupid });
        }
    }

    pub(crate) fn detach_process_unlocked(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        gupid: &Gupid,
        actions: &mut Vec<Action>,
    ) -> bool {
        let Some(name) = inner.group_of_process(gupid) else {
            return false;
        };
        let (process, cancel_callbacks, needs_replacement) = {
            let group = inner.groups.get_mut(&name).expect("group located above");
            let Some(process) = group.remove_process(gupid) else {
                return false;
            };
            group.forget_restart_victim(gupid);
            let callbacks = group.take_disable_waiters(gupid);
            let needs = !group.get_waitlist.is_empty() && group.enabled_count() == 0;
            (process, callbacks, needs)
        };

        process.handle().mark_detached();
        for callback in cancel_callbacks {
            actions.push(Box::new(move || callback(DisableResult::Canceled)));
        }
        inner.publish(PoolEvent::ProcessDetached {
            group: name.clone(),
            gupid: gupid.clone(),
        });
        tracing::info!(group = %name, pid = process.pid(), gupid = %gupid, "detached process");
        Self::schedule_termination(shared, actions, process.handle().clone());

        if needs_replacement {
            Self::ensure_spawn_for_waiters(shared, inner, &name, actions);
        }
        true
    }

    pub(crate) fn detach_group_unlocked(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        name: &str,
        actions: &mut Vec<Action>,
    ) -> bool {
        let Some(mut group) = inner.groups.remove(name) else {
            return false;
        };

        let waiters: Vec<Waiter> = group.get_waitlist.drain(..).collect();
        for waiter in waiters {
            Self::fail_waiter(
                waiter,
                PoolError::GroupShuttingDown { group: name.to_string() },
                actions,
            );
        }
        for callback in group.take_all_disable_waiters() {
            actions.push(Box::new(move || callback(DisableResult::Canceled)));
        }

        let processes: Vec<Process> = group
            .enabled
            .drain(..)
            .chain(group.disabling.drain(..))
            .chain(group.disabled.drain(..))
            .collect();
        for process in processes {
            process.handle().mark_detached();
            Self::schedule_termination(shared, actions, process.handle().clone());
        }

        if group.processes_being_spawned > 0 {
            // spawns in flight keep the (now empty) shell in the map until
            // they land; spawn completion removes it
            group.life_status = GroupLifeStatus::ShuttingDown;
            inner.groups.insert(name.to_string(), group);
        } else {
            inner.publish(PoolEvent::GroupDetached { group: name.to_string() });
        }
        tracing::info!(group = %name, "detached application group");
        true
    }

    /// Ask the spawner to tear a process down, once it is both detached and
    /// session-free
    fn schedule_termination(shared: &Arc<PoolShared>, actions: &mut Vec<Action>, handle: Arc<ProcessHandle>) {
        if !handle.ready_for_termination() || !handle.claim_termination() {
            return;
        }
        let shared = shared.clone();
        actions.push(Box::new(move || {
            let spawner = shared.spawner.clone();
            let runtime = shared.runtime.clone();
            let registrar = shared.clone();
            let task = runtime.spawn(async move {
                spawner.terminate(handle).await;
            });
            Pool::register_cleanup_task(&registrar, task);
        }));
    }

    /// Track a teardown/spawn task so destroy can join it
    pub(crate) fn register_cleanup_task(shared: &Arc<PoolShared>, task: JoinHandle<()>) {
        let mut inner = shared.lock();
        inner.non_interruptable_tasks.retain(|t| !t.is_finished());
        inner.non_interruptable_tasks.push(task);
    }

    /// Pick an eviction victim per policy: an idle process whose group can
    /// spare it, oldest first; otherwise the globally oldest idle process
    pub(crate) fn find_best_process_to_trash(inner: &PoolInner, exclude: Option<&str>) -> Option<Gupid> {
        let mut best: Option<(Instant, Gupid)> = None;
        let mut fallback: Option<(Instant, Gupid)> = None;

        for (name, group) in &inner.groups {
            if exclude == Some(name.as_str()) {
                continue;
            }
            for process in group.processes() {
                if process.sessions() != 0 {
                    continue;
                }
                // never strand a queue behind an empty group
                let last_enabled_of_waiting_group = !group.get_waitlist.is_empty()
                    && process.enabled() == EnabledState::Enabled
                    && group.enabled_count() <= 1;
                if last_enabled_of_waiting_group {
                    continue;
                }

                let sparable = group.enabled_count() > 1 || group.options().min_processes == 0;
                let slot = if sparable { &mut best } else { &mut fallback };
                let replace = match slot {
                    None => true,
                    Some((oldest, _)) => process.last_used() < *oldest,
                };
                if replace {
                    *slot = Some((process.last_used(), process.gupid().clone()));
                }
            }
        }

        best.or(fallback).map(|(_, gupid)| gupid)
    }

    /// Trash an idle process outside `exclude` to relieve capacity pressure
    fn force_free_capacity(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        exclude: Option<&str>,
        actions: &mut Vec<Action>,
    ) -> bool {
        match Self::find_best_process_to_trash(inner, exclude) {
            Some(victim) => Self::detach_process_unlocked(shared, inner, &victim, actions),
            None => false,
        }
    }

    /// Run after any event that may have freed capacity: drain the pool
    /// wait-list oldest-first, then give existing groups their fill
    pub(crate) fn rebalance(shared: &Arc<PoolShared>, inner: &mut PoolInner, actions: &mut Vec<Action>) {
        if inner.rebalancing || inner.life_status != PoolLifeStatus::Alive {
            return;
        }
        inner.rebalancing = true;
        Self::drain_pool_waitlist(shared, inner, actions);
        Self::possibly_spawn_more_processes_for_existing_groups(shared, inner, actions);
        inner.rebalancing = false;
    }

    fn drain_pool_waitlist(shared: &Arc<PoolShared>, inner: &mut PoolInner, actions: &mut Vec<Action>) {
        loop {
            let name = match inner.get_waitlist.front() {
                Some(waiter) => waiter.options.app_group_name.clone(),
                None => break,
            };

            // the group may have appeared while this waiter was parked
            if inner.groups.contains_key(&name) {
                let waiter = inner.get_waitlist.pop_front().expect("front checked");
                Self::group_admit(shared, inner, &name, waiter, actions);
                continue;
            }

            if inner.capacity_used() >= inner.max {
                let Some(victim) = Self::find_best_process_to_trash(inner, None) else {
                    break;
                };
                Self::detach_process_unlocked(shared, inner, &victim, actions);
                if inner.capacity_used() >= inner.max {
                    break;
                }
            }

            let waiter = inner.get_waitlist.pop_front().expect("front checked");
            Self::create_group(shared, inner, &waiter.options, actions);
            Self::group_admit(shared, inner, &name, waiter, actions);
        }
    }

    fn possibly_spawn_more_processes_for_existing_groups(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        actions: &mut Vec<Action>,
    ) {
        let names: Vec<String> = inner.groups.keys().cloned().collect();
        for name in names {
            if inner.capacity_used() >= inner.max {
                break;
            }
            Self::restore_min_processes(shared, inner, &name, actions);
            Self::ensure_spawn_for_waiters(shared, inner, &name, actions);
            Self::continue_rolling_restart(shared, inner, &name, actions);
        }
    }

    /// Spawn until the group covers `min_processes`; direct spawning may
    /// burst, smart spawning chains one spawn at a time
    fn restore_min_processes(shared: &Arc<PoolShared>, inner: &mut PoolInner, name: &str, actions: &mut Vec<Action>) {
        loop {
            let burst = {
                let Some(group) = inner.groups.get(name) else {
                    return;
                };
                if group.life_status != GroupLifeStatus::Alive
                    || group.is_restarting()
                    || !group.options().allows_process_count(group.capacity_used())
                {
                    return;
                }
                let covered = group.enabled_count() + group.processes_being_spawned;
                if covered >= group.options().min_processes {
                    return;
                }
                if group.options().spawn_method == SpawnMethod::Smart && group.is_spawning() {
                    return;
                }
                group.options().spawn_method == SpawnMethod::Direct
            };
            if inner.capacity_used() >= inner.max {
                return;
            }
            Self::initiate_spawn(shared, inner, name, actions);
            if !burst {
                return;
            }
        }
    }

    /// Drive a rolling restart forward when capacity allows
    fn continue_rolling_restart(shared: &Arc<PoolShared>, inner: &mut PoolInner, name: &str, actions: &mut Vec<Action>) {
        {
            let Some(group) = inner.groups.get(name) else {
                return;
            };
            if !group.is_restarting() || group.restart_old.is_empty() || group.is_spawning() {
                return;
            }
        }

        let needs_room = inner.capacity_used() >= inner.max
            || inner
                .groups
                .get(name)
                .map(|g| !g.options().allows_process_count(g.capacity_used()))
                .unwrap_or(true);
        if needs_room {
            // retire an idle old-generation process up front to make room;
            // if none is idle yet, wait for natural churn
            let victim = inner.groups.get(name).and_then(|group| {
                group
                    .restart_old
                    .iter()
                    .find(|gupid| {
                        group
                            .process_ref(gupid)
                            .map(|p| p.sessions() == 0)
                            .unwrap_or(false)
                    })
                    .cloned()
            });
            let Some(victim) = victim else {
                return;
            };
            Self::detach_process_unlocked(shared, inner, &victim, actions);
            if inner.capacity_used() >= inner.max {
                return;
            }
        }
        Self::initiate_spawn(shared, inner, name, actions);
    }

    fn restart_group_unlocked(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        name: &str,
        method: Option<RestartMethod>,
        actions: &mut Vec<Action>,
    ) -> bool {
        let method = {
            let Some(group) = inner.groups.get(name) else {
                return false;
            };
            if group.life_status != GroupLifeStatus::Alive {
                return false;
            }
            if group.is_restarting() {
                return true;
            }
            method.unwrap_or(group.options().restart_method)
        };

        inner.publish(PoolEvent::RestartInitiated { group: name.to_string() });
        tracing::info!(group = %name, method = ?method, "restarting application group");

        match method {
            RestartMethod::Blocking => {
                let gupids: Vec<Gupid> = inner
                    .groups
                    .get(name)
                    .map(|g| g.processes().map(|p| p.gupid().clone()).collect())
                    .unwrap_or_default();
                for gupid in gupids {
                    Self::detach_process_unlocked(shared, inner, &gupid, actions);
                }
                Self::restore_min_processes(shared, inner, name, actions);
                Self::ensure_spawn_for_waiters(shared, inner, name, actions);
                inner.publish(PoolEvent::RestartCompleted { group: name.to_string() });
                Self::rebalance(shared, inner, actions);
            }
            RestartMethod::Rolling => {
                let nothing_to_replace = {
                    let Some(group) = inner.groups.get_mut(name) else {
                        return false;
                    };
                    let old: Vec<Gupid> = group.processes().map(|p| p.gupid().clone()).collect();
                    group.restart_old = old;
                    if group.restart_old.is_empty() {
                        true
                    } else {
                        group.restarting = true;
                        false
                    }
                };
                if nothing_to_replace {
                    Self::restore_min_processes(shared, inner, name, actions);
                    inner.publish(PoolEvent::RestartCompleted { group: name.to_string() });
                } else {
                    Self::continue_rolling_restart(shared, inner, name, actions);
                }
            }
        }
        true
    }

    fn do_disable(
        shared: &Arc<PoolShared>,
        inner: &mut PoolInner,
        gupid: &Gupid,
        callback: Option<DisableCallback>,
        actions: &mut Vec<Action>,
    ) -> DisableResult {
        if inner.life_status != PoolLifeStatus::Alive {
            return DisableResult::Error;
        }
        let Some(name) = inner.group_of_process(gupid) else {
            return DisableResult::Noop;
        };

        let outcome = {
            let group = inner.groups.get_mut(&name).expect("group located above");
            if group.life_status != GroupLifeStatus::Alive {
                return DisableResult::Error;
            }
            let outcome = group.begin_disable(gupid);
            if outcome == DisableOutcome::Draining {
                if let Some(callback) = callback {
                    group.push_disable_waiter(gupid.clone(), callback);
                }
            }
            outcome
        };

        match outcome {
            DisableOutcome::NotFound | DisableOutcome::AlreadyDisabled => DisableResult::Noop,
            DisableOutcome::NowDisabled => {
                inner.publish(PoolEvent::ProcessDisabled {
                    group: name.clone(),
                    gupid: gupid.clone(),
                });
                tracing::info!(group = %name, gupid = %gupid, "process disabled");
                Self::ensure_spawn_for_waiters(shared, inner, &name, actions);
                DisableResult::Success
            }
            DisableOutcome::Draining => {
                tracing::info!(group = %name, gupid = %gupid, "process draining towards disabled");
                Self::ensure_spawn_for_waiters(shared, inner, &name, actions);
                DisableResult::Deferred
            }
        }
    }

    fn do_enable(shared: &Arc<PoolShared>, inner: &mut PoolInner, gupid: &Gupid, actions: &mut Vec<Action>) -> bool {
        let Some(name) = inner.group_of_process(gupid) else {
            return false;
        };
        let (enabled, canceled_disables) = {
            let Some(group) = inner.groups.get_mut(&name) else {
                return false;
            };
            let was_draining = group.list_of(gupid) == Some(crate::core::group::ProcessList::Disabling);
            if !group.enable(gupid) {
                return false;
            }
            let callbacks = if was_draining {
                group.take_disable_waiters(gupid)
            } else {
                Vec::new()
            };
            (true, callbacks)
        };
        for callback in canceled_disables {
            actions.push(Box::new(move || callback(DisableResult::Canceled)));
        }
        if enabled {
            inner.publish(PoolEvent::ProcessEnabled {
                group: name.clone(),
                gupid: gupid.clone(),
            });
            Self::assign_sessions_in_group(shared, inner, &name, actions);
        }
        enabled
    }

    // ---------------------------------------------------------------
    // Invariant checking
    // ---------------------------------------------------------------

    /// Runs on every lock release when self-checking is on; a violated
    /// invariant aborts because continuing risks silent corruption
    pub(crate) fn finalize(inner: &mut PoolInner) {
        if inner.max_overcommit && inner.capacity_used() <= inner.max {
            inner.max_overcommit = false;
        }
        if !inner.self_checking {
            return;
        }
        Self::verify_invariants(inner);
        if inner.expensive_checks {
            Self::verify_expensive_invariants(inner);
        }
    }

    fn invariant_violated(message: &str) -> ! {
        tracing::error!(invariant = message, "pool invariant violated");
        panic!("pool invariant violated: {message}");
    }

    pub(crate) fn verify_invariants(inner: &PoolInner) {
        let used = inner.capacity_used();
        if used > inner.max && !inner.max_overcommit {
            Self::invariant_violated("capacity in use exceeds the configured maximum");
        }
        if !inner.get_waitlist.is_empty() && used < inner.max {
            Self::invariant_violated("pool wait-list is populated below full capacity");
        }
        for group in inner.groups.values() {
            if group.disabled.iter().any(|p| p.sessions() != 0) {
                Self::invariant_violated("disabled process still holds sessions");
            }
        }
    }

    pub(crate) fn verify_expensive_invariants(inner: &PoolInner) {
        for waiter in &inner.get_waitlist {
            if inner.groups.contains_key(&waiter.options.app_group_name) {
                Self::invariant_violated("pool wait-list entry has a live group");
            }
        }
        let at_capacity = inner.at_full_capacity();
        for group in inner.groups.values() {
            if group.enabled_count() == 0 && !group.get_waitlist.is_empty() {
                let covered = group.is_spawning() || group.is_restarting() || at_capacity;
                if !covered {
                    Self::invariant_violated("group queue is stranded with no process on the way");
                }
            }
            for process in &group.enabled {
                if process.enabled() != EnabledState::Enabled {
                    Self::invariant_violated("enabled list holds a non-enabled process");
                }
            }
            for process in &group.disabling {
                if process.enabled() != EnabledState::Disabling {
                    Self::invariant_violated("disabling list holds a non-disabling process");
                }
            }
            for process in &group.disabled {
                if process.enabled() != EnabledState::Disabled {
                    Self::invariant_violated("disabled list holds a non-disabled process");
                }
            }
        }
    }
}
