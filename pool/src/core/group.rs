//! Per-application group: process lists, admission queue, restart state

use crate::core::options::Options;
use crate::core::process::{EnabledState, Process};
use crate::pool::{DisableCallback, Waiter};
use shared::{GroupSecret, Gupid};
use std::collections::VecDeque;
use std::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupLifeStatus {
    Alive,
    /// Detach requested while spawns were still in flight; the group stays
    /// in the pool map, empty, until the last spawn completes
    ShuttingDown,
    ShutDown,
}

impl GroupLifeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupLifeStatus::Alive => "alive",
            GroupLifeStatus::ShuttingDown => "shutting_down",
            GroupLifeStatus::ShutDown => "shut_down",
        }
    }
}

/// Which of the three process lists a process currently sits in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProcessList {
    Enabled,
    Disabling,
    Disabled,
}

/// Outcome of the group-local part of a disable request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DisableOutcome {
    NotFound,
    AlreadyDisabled,
    NowDisabled,
    Draining,
}

/// All processes serving one application identity, plus the queue of
/// requests waiting for one of them
///
/// Owned by the pool and only ever touched under the pool lock. The pool
/// handles everything that needs cross-group context (capacity, eviction,
/// the global wait-list); the group handles routing, draining and restart
/// bookkeeping for its own processes.
pub struct Group {
    pub(crate) name: String,
    pub(crate) secret: GroupSecret,
    pub(crate) options: Options,

    /// Accepting sessions; scanned round-robin from `rr_cursor`
    pub(crate) enabled: Vec<Process>,
    /// Draining towards zero sessions
    pub(crate) disabling: Vec<Process>,
    /// Drained and parked
    pub(crate) disabled: Vec<Process>,

    pub(crate) rr_cursor: usize,
    pub(crate) get_waitlist: VecDeque<Waiter>,

    pub(crate) processes_being_spawned: u32,

    pub(crate) restarting: bool,
    /// Old-generation processes still to be replaced by a rolling restart
    pub(crate) restart_old: Vec<Gupid>,

    pub(crate) life_status: GroupLifeStatus,

    /// Callbacks waiting for a specific process to finish draining
    disable_waiters: Vec<(Gupid, DisableCallback)>,

    /// Last time a spawn was initiated; drives preloader retirement
    pub(crate) last_spawn_at: Instant,
    /// Set once the preloader has been cleaned for the current idle stretch
    pub(crate) preloader_cleaned: bool,
}

impl Group {
    pub(crate) fn new(options: Options) -> Self {
        Self {
            name: options.app_group_name.clone(),
            secret: GroupSecret::new(),
            options,
            enabled: Vec::new(),
            disabling: Vec::new(),
            disabled: Vec::new(),
            rr_cursor: 0,
            get_waitlist: VecDeque::new(),
            processes_being_spawned: 0,
            restarting: false,
            restart_old: Vec::new(),
            life_status: GroupLifeStatus::Alive,
            disable_waiters: Vec::new(),
            last_spawn_at: Instant::now(),
            preloader_cleaned: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret(&self) -> &GroupSecret {
        &self.secret
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn life_status(&self) -> GroupLifeStatus {
        self.life_status
    }

    pub fn enabled_count(&self) -> u32 {
        self.enabled.len() as u32
    }

    pub fn disabling_count(&self) -> u32 {
        self.disabling.len() as u32
    }

    pub fn disabled_count(&self) -> u32 {
        self.disabled.len() as u32
    }

    /// Live processes in any list, excluding spawns in flight
    pub fn process_count(&self) -> u32 {
        (self.enabled.len() + self.disabling.len() + self.disabled.len()) as u32
    }

    /// This group's share of the pool capacity, spawns in flight included
    pub fn capacity_used(&self) -> u32 {
        self.process_count() + self.processes_being_spawned
    }

    pub fn is_spawning(&self) -> bool {
        self.processes_being_spawned > 0
    }

    pub fn is_restarting(&self) -> bool {
        self.restarting
    }

    /// Pick the least busy enabled process that can take a session
    ///
    /// The round-robin cursor decides ties so equally busy processes are
    /// used in rotation; among equally busy candidates a lower lifetime
    /// request count wins, which spreads load onto fresh processes.
    pub(crate) fn route_session(&mut self) -> Option<&mut Process> {
        let len = self.enabled.len();
        if len == 0 {
            return None;
        }

        let mut best: Option<usize> = None;
        for offset in 0..len {
            let idx = (self.rr_cursor + offset) % len;
            let candidate = &self.enabled[idx];
            if !candidate.can_accept() {
                continue;
            }
            match best {
                None => best = Some(idx),
                Some(current) => {
                    let incumbent = &self.enabled[current];
                    if candidate.busyness() < incumbent.busyness()
                        || (candidate.busyness() == incumbent.busyness()
                            && candidate.processed() < incumbent.processed())
                    {
                        best = Some(idx);
                    }
                }
            }
        }

        let idx = best?;
        self.rr_cursor = (idx + 1) % len;
        Some(&mut self.enabled[idx])
    }

    /// Whether any enabled process could take a session right now
    pub(crate) fn has_free_capacity(&self) -> bool {
        self.enabled.iter().any(|p| p.can_accept())
    }

    pub(crate) fn list_of(&self, gupid: &Gupid) -> Option<ProcessList> {
        if self.enabled.iter().any(|p| p.gupid() == gupid) {
            Some(ProcessList::Enabled)
        } else if self.disabling.iter().any(|p| p.gupid() == gupid) {
            Some(ProcessList::Disabling)
        } else if self.disabled.iter().any(|p| p.gupid() == gupid) {
            Some(ProcessList::Disabled)
        } else {
            None
        }
    }

    pub(crate) fn process_ref(&self, gupid: &Gupid) -> Option<&Process> {
        self.enabled
            .iter()
            .chain(self.disabling.iter())
            .chain(self.disabled.iter())
            .find(|p| p.gupid() == gupid)
    }

    pub(crate) fn process_mut(&mut self, gupid: &Gupid) -> Option<&mut Process> {
        self.enabled
            .iter_mut()
            .chain(self.disabling.iter_mut())
            .chain(self.disabled.iter_mut())
            .find(|p| p.gupid() == gupid)
    }

    pub(crate) fn processes(&self) -> impl Iterator<Item = &Process> {
        self.enabled
            .iter()
            .chain(self.disabling.iter())
            .chain(self.disabled.iter())
    }

    pub(crate) fn processes_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.enabled
            .iter_mut()
            .chain(self.disabling.iter_mut())
            .chain(self.disabled.iter_mut())
    }

    /// Remove a process from whichever list holds it
    pub(crate) fn remove_process(&mut self, gupid: &Gupid) -> Option<Process> {
        for list in [&mut self.enabled, &mut self.disabling, &mut self.disabled] {
            if let Some(pos) = list.iter().position(|p| p.gupid() == gupid) {
                let process = list.remove(pos);
                self.rr_cursor = 0;
                return Some(process);
            }
        }
        None
    }

    /// File a freshly spawned process under the enabled list
    pub(crate) fn insert_spawned(&mut self, process: Process) {
        debug_assert_eq!(process.enabled(), EnabledState::Enabled);
        self.enabled.push(process);
    }

    /// Group-local part of a disable request; the pool owns the callback
    /// plumbing and the replacement-spawn decision
    pub(crate) fn begin_disable(&mut self, gupid: &Gupid) -> DisableOutcome {
        match self.list_of(gupid) {
            None => DisableOutcome::NotFound,
            Some(ProcessList::Disabled) => DisableOutcome::AlreadyDisabled,
            Some(ProcessList::Disabling) => DisableOutcome::Draining,
            Some(ProcessList::Enabled) => {
                let pos = self
                    .enabled
                    .iter()
                    .position(|p| p.gupid() == gupid)
                    .expect("list_of said enabled");
                let mut process = self.enabled.remove(pos);
                self.rr_cursor = 0;
                if process.sessions() == 0 {
                    process.set_enabled(EnabledState::Disabled);
                    self.disabled.push(process);
                    DisableOutcome::NowDisabled
                } else {
                    process.set_enabled(EnabledState::Disabling);
                    self.disabling.push(process);
                    DisableOutcome::Draining
                }
            }
        }
    }

    /// Move a drained process from `disabling` to `disabled`
    pub(crate) fn finish_disable(&mut self, gupid: &Gupid) -> bool {
        if let Some(pos) = self.disabling.iter().position(|p| p.gupid() == gupid) {
            let mut process = self.disabling.remove(pos);
            debug_assert_eq!(process.sessions(), 0);
            process.set_enabled(EnabledState::Disabled);
            self.disabled.push(process);
            true
        } else {
            false
        }
    }

    /// Bring a disabled or draining process back into rotation
    pub(crate) fn enable(&mut self, gupid: &Gupid) -> bool {
        for list in [&mut self.disabled, &mut self.disabling] {
            if let Some(pos) = list.iter().position(|p| p.gupid() == gupid) {
                let mut process = list.remove(pos);
                process.set_enabled(EnabledState::Enabled);
                self.enabled.push(process);
                return true;
            }
        }
        false
    }

    pub(crate) fn push_disable_waiter(&mut self, gupid: Gupid, callback: DisableCallback) {
        self.disable_waiters.push((gupid, callback));
    }

    pub(crate) fn take_disable_waiters(&mut self, gupid: &Gupid) -> Vec<DisableCallback> {
        let mut taken = Vec::new();
        let mut kept = Vec::new();
        for (id, callback) in self.disable_waiters.drain(..) {
            if &id == gupid {
                taken.push(callback);
            } else {
                kept.push((id, callback));
            }
        }
        self.disable_waiters = kept;
        taken
    }

    pub(crate) fn take_all_disable_waiters(&mut self) -> Vec<DisableCallback> {
        self.disable_waiters
            .drain(..)
            .map(|(_, callback)| callback)
            .collect()
    }

    pub(crate) fn remove_waiter_by_ticket(&mut self, ticket: u64) -> Option<Waiter> {
        let pos = self.get_waitlist.iter().position(|w| w.ticket == ticket)?;
        self.get_waitlist.remove(pos)
    }

    /// Pick the next old-generation process a rolling restart should retire,
    /// preferring one that is already idle
    pub(crate) fn take_next_restart_victim(&mut self) -> Option<Gupid> {
        if self.restart_old.is_empty() {
            return None;
        }
        let idle_pos = self.restart_old.iter().position(|gupid| {
            self.process_ref(gupid)
                .map(|p| p.sessions() == 0)
                .unwrap_or(false)
        });
        let pos = idle_pos.unwrap_or(0);
        Some(self.restart_old.remove(pos))
    }

    /// Forget an old-generation entry whose process went away by other means
    pub(crate) fn forget_restart_victim(&mut self, gupid: &Gupid) {
        self.restart_old.retain(|g| g != gupid);
    }

    /// Whether the garbage collector may drop the whole group
    pub(crate) fn garbage_collectable(&self) -> bool {
        self.life_status == GroupLifeStatus::Alive
            && self.process_count() == 0
            && self.processes_being_spawned == 0
            && self.get_waitlist.is_empty()
            && !self.restarting
            && self.options.min_processes == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::process::ProcessHandle;
    use chrono::Utc;
    use std::sync::Arc;

    fn group_with(options: Options) -> Group {
        Group::new(options)
    }

    fn add_process(group: &mut Group, pid: u32, concurrency: u32) -> Gupid {
        let gupid = Gupid::new();
        let handle = Arc::new(ProcessHandle::new(
            pid,
            gupid.clone(),
            group.name.clone(),
            "127.0.0.1:4000".parse().unwrap(),
            Utc::now(),
        ));
        group.insert_spawned(Process::new(handle, concurrency));
        gupid
    }

    #[test]
    fn test_route_session_round_robins_equal_busyness() {
        let mut group = group_with(Options::for_app_root("/srv/app"));
        let a = add_process(&mut group, 1, 0);
        let b = add_process(&mut group, 2, 0);
        let c = add_process(&mut group, 3, 0);

        let picked: Vec<Gupid> = (0..3)
            .map(|_| {
                let process = group.route_session().unwrap();
                let gupid = process.gupid().clone();
                // keep busyness equal for the next pick
                gupid
            })
            .collect();

        assert_eq!(picked, vec![a, b, c]);
    }

    #[test]
    fn test_route_session_prefers_least_busy() {
        let mut group = group_with(Options::for_app_root("/srv/app"));
        let _a = add_process(&mut group, 1, 0);
        let b = add_process(&mut group, 2, 0);

        // load the first process
        {
            let process = group.process_mut(&_a).unwrap();
            process.note_session_opened();
            process.note_session_opened();
        }

        let picked = group.route_session().unwrap();
        assert_eq!(picked.gupid(), &b);
    }

    #[test]
    fn test_route_session_skips_saturated_processes() {
        let mut group = group_with(Options::for_app_root("/srv/app"));
        let a = add_process(&mut group, 1, 1);
        group.process_mut(&a).unwrap().note_session_opened();

        assert!(group.route_session().is_none());
        assert!(!group.has_free_capacity());
    }

    #[test]
    fn test_disable_idle_process_goes_straight_to_disabled() {
        let mut group = group_with(Options::for_app_root("/srv/app"));
        let a = add_process(&mut group, 1, 0);

        assert_eq!(group.begin_disable(&a), DisableOutcome::NowDisabled);
        assert_eq!(group.list_of(&a), Some(ProcessList::Disabled));
        assert_eq!(group.begin_disable(&a), DisableOutcome::AlreadyDisabled);
    }

    #[test]
    fn test_disable_busy_process_drains_first() {
        let mut group = group_with(Options::for_app_root("/srv/app"));
        let a = add_process(&mut group, 1, 0);
        group.process_mut(&a).unwrap().note_session_opened();

        assert_eq!(group.begin_disable(&a), DisableOutcome::Draining);
        assert_eq!(group.list_of(&a), Some(ProcessList::Disabling));

        group.process_mut(&a).unwrap().note_session_closed();
        assert!(group.finish_disable(&a));
        assert_eq!(group.list_of(&a), Some(ProcessList::Disabled));
    }

    #[test]
    fn test_enable_after_disable_restores_rotation() {
        let mut group = group_with(Options::for_app_root("/srv/app"));
        let a = add_process(&mut group, 1, 0);

        group.begin_disable(&a);
        assert!(group.enable(&a));
        assert_eq!(group.list_of(&a), Some(ProcessList::Enabled));
        assert!(group.route_session().is_some());
    }

    #[test]
    fn test_group_gc_eligibility() {
        let mut group = group_with(Options::for_app_root("/srv/app").with_min_processes(0));
        assert!(group.garbage_collectable());

        let a = add_process(&mut group, 1, 0);
        assert!(!group.garbage_collectable());

        group.remove_process(&a);
        assert!(group.garbage_collectable());

        group.processes_being_spawned = 1;
        assert!(!group.garbage_collectable());
    }

    #[test]
    fn test_restart_victims_prefer_idle_processes() {
        let mut group = group_with(Options::for_app_root("/srv/app"));
        let busy = add_process(&mut group, 1, 0);
        let idle = add_process(&mut group, 2, 0);
        group.process_mut(&busy).unwrap().note_session_opened();

        group.restart_old = vec![busy.clone(), idle.clone()];
        assert_eq!(group.take_next_restart_victim(), Some(idle));
        assert_eq!(group.take_next_restart_victim(), Some(busy));
        assert_eq!(group.take_next_restart_victim(), None);
    }
}
