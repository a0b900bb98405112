//! Garbage collector
//!
//! One background task sleeping towards the earliest deadline it knows
//! about: the next idle-process eviction, the next waiter timeout or the
//! next preloader retirement. `gc_notify` wakes it early whenever something
//! moves a deadline (new waiter, `set_max_idle_time`, a shrunken `max`).

use shared::{Gupid, PoolEvent};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::core::group::GroupLifeStatus;
use crate::core::process::EnabledState;
use crate::error::PoolError;
use crate::pool::{run_actions, Pool, PoolLifeStatus, PoolShared, Waiter};

pub(crate) fn spawn_garbage_collector(
    shared: Arc<PoolShared>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let next_run = Pool::garbage_collect(&shared);
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = shared.gc_notify.notified() => {}
                _ = tokio::time::sleep_until(tokio::time::Instant::from_std(next_run)) => {}
            }
        }
        tracing::debug!("garbage collector stopped");
    })
}

impl Pool {
    /// One collection cycle; returns when the next one is due
    pub(crate) fn garbage_collect(shared: &Arc<PoolShared>) -> Instant {
        let now = Instant::now();
        let mut actions = Vec::new();
        let mut next: Option<Instant> = None;
        let mut detached_processes = 0usize;
        let mut detached_groups = 0usize;
        let mut preloader_cleanups: Vec<String> = Vec::new();

        let next_run = {
            let mut inner = shared.lock();
            if inner.life_status != PoolLifeStatus::Alive {
                return now + Duration::from_secs(60);
            }
            let max_idle = inner.max_idle_time;
            let preloader_idle = inner.preloader_idle_time;
            let names: Vec<String> = inner.groups.keys().cloned().collect();

            // Idle process eviction, one process at a time so the min bound
            // is re-evaluated after every detach.
            for name in &names {
                loop {
                    let candidate = {
                        let Some(group) = inner.groups.get(name) else {
                            break;
                        };
                        if group.life_status != GroupLifeStatus::Alive {
                            break;
                        }
                        let covered = group.process_count() + group.processes_being_spawned;
                        let min = group.options().min_processes;
                        let mut pick: Option<(Instant, Gupid)> = None;
                        for process in group.processes() {
                            if process.sessions() != 0 {
                                continue;
                            }
                            let idle_deadline = process.last_used() + max_idle;
                            if idle_deadline > now {
                                next = Some(next.map_or(idle_deadline, |n| n.min(idle_deadline)));
                                continue;
                            }
                            if covered <= min {
                                continue;
                            }
                            if !group.get_waitlist.is_empty()
                                && process.enabled() == EnabledState::Enabled
                                && group.enabled_count() <= 1
                            {
                                continue;
                            }
                            let replace = pick
                                .as_ref()
                                .map_or(true, |(oldest, _)| process.last_used() < *oldest);
                            if replace {
                                pick = Some((process.last_used(), process.gupid().clone()));
                            }
                        }
                        pick.map(|(_, gupid)| gupid)
                    };
                    match candidate {
                        Some(gupid) => {
                            tracing::info!(group = %name, gupid = %gupid, "evicting idle process");
                            Pool::detach_process_unlocked(shared, &mut inner, &gupid, &mut actions);
                            detached_processes += 1;
                        }
                        None => break,
                    }
                }
            }

            // Waiter timeouts: group queues first, then the pool queue.
            let mut timed_out: Vec<(Option<String>, Waiter)> = Vec::new();
            for name in &names {
                if let Some(group) = inner.groups.get_mut(name) {
                    let mut kept = VecDeque::new();
                    while let Some(waiter) = group.get_waitlist.pop_front() {
                        if waiter.deadline <= now {
                            timed_out.push((Some(name.clone()), waiter));
                        } else {
                            next = Some(next.map_or(waiter.deadline, |n| n.min(waiter.deadline)));
                            kept.push_back(waiter);
                        }
                    }
                    group.get_waitlist = kept;
                }
            }
            {
                let mut kept = VecDeque::new();
                while let Some(waiter) = inner.get_waitlist.pop_front() {
                    if waiter.deadline <= now {
                        timed_out.push((None, waiter));
                    } else {
                        next = Some(next.map_or(waiter.deadline, |n| n.min(waiter.deadline)));
                        kept.push_back(waiter);
                    }
                }
                inner.get_waitlist = kept;
            }
            for (group, waiter) in timed_out {
                inner.publish(PoolEvent::WaiterTimedOut { group });
                let waited = now.duration_since(waiter.enqueued_at);
                Pool::fail_waiter(waiter, PoolError::RequestQueueTimeout { waited }, &mut actions);
            }

            // Preloader retirement for groups that have not spawned lately.
            for name in &names {
                let mut cleanup = false;
                if let Some(group) = inner.groups.get_mut(name) {
                    if group.life_status == GroupLifeStatus::Alive
                        && !group.preloader_cleaned
                        && !group.is_spawning()
                    {
                        let deadline = group.last_spawn_at + preloader_idle;
                        if deadline <= now {
                            group.preloader_cleaned = true;
                            cleanup = true;
                        } else {
                            next = Some(next.map_or(deadline, |n| n.min(deadline)));
                        }
                    }
                }
                if cleanup {
                    preloader_cleanups.push(name.clone());
                }
            }

            // Groups with nothing left and nothing pending go away entirely.
            for name in &names {
                let collectable = inner
                    .groups
                    .get(name)
                    .map(|g| g.garbage_collectable())
                    .unwrap_or(false);
                if collectable {
                    inner.groups.remove(name);
                    inner.publish(PoolEvent::GroupDetached { group: name.clone() });
                    tracing::debug!(group = %name, "collected idle group");
                    detached_groups += 1;
                }
            }

            inner.non_interruptable_tasks.retain(|t| !t.is_finished());

            Pool::rebalance(shared, &mut inner, &mut actions);
            inner.publish(PoolEvent::GarbageCollected {
                detached_processes,
                detached_groups,
            });
            Pool::finalize(&mut inner);

            next.unwrap_or(now + max_idle)
        };

        for name in preloader_cleanups {
            let shared = shared.clone();
            actions.push(Box::new(move || {
                let spawner = shared.spawner.clone();
                let runtime = shared.runtime.clone();
                let registrar = shared.clone();
                let task = runtime.spawn(async move {
                    spawner.cleanup_idle(name).await;
                });
                Pool::register_cleanup_task(&registrar, task);
            }));
        }

        run_actions(actions);
        next_run.max(now + Duration::from_millis(10))
    }
}
