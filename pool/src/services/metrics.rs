//! Metrics collector
//!
//! Polls OS-level per-pid metrics in batch outside the pool lock, then
//! takes the lock briefly to merge the results into the process records.
//! A pid the OS no longer reports means the worker died without the pool
//! noticing; such processes are detached on the spot.

use shared::{Gupid, PoolEvent};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::core::process::ProcessLifeStatus;
use crate::pool::{run_actions, Pool, PoolLifeStatus, PoolShared};

pub(crate) fn spawn_metrics_collector(
    shared: Arc<PoolShared>,
    mut shutdown_rx: watch::Receiver<bool>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick fires immediately; skip it so a freshly created
        // pool is not polled before it owns any process
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    Pool::collect_process_metrics(&shared).await;
                }
            }
        }
        tracing::debug!("metrics collector stopped");
    })
}

impl Pool {
    /// One collection cycle: snapshot pids, poll, merge
    pub(crate) async fn collect_process_metrics(shared: &Arc<PoolShared>) {
        let targets: Vec<(u32, Gupid, String)> = {
            let inner = shared.lock();
            if inner.life_status != PoolLifeStatus::Alive {
                return;
            }
            inner
                .groups
                .iter()
                .flat_map(|(name, group)| {
                    group
                        .processes()
                        .map(move |p| (p.pid(), p.gupid().clone(), name.clone()))
                })
                .collect()
        };
        if targets.is_empty() {
            return;
        }

        let pids: Vec<u32> = targets.iter().map(|(pid, _, _)| *pid).collect();
        let metrics = shared.metrics_source.collect(pids).await;

        let mut actions = Vec::new();
        {
            let mut inner = shared.lock();
            if inner.life_status != PoolLifeStatus::Alive {
                return;
            }
            let mut dead = 0usize;
            for (pid, gupid, name) in &targets {
                match metrics.get(pid) {
                    Some(sample) => {
                        if let Some(process) = inner
                            .groups
                            .get_mut(name)
                            .and_then(|g| g.process_mut(gupid))
                        {
                            process.set_metrics(sample.clone());
                        }
                    }
                    None => {
                        let still_tracked = inner
                            .groups
                            .get(name)
                            .map(|g| g.list_of(gupid).is_some())
                            .unwrap_or(false);
                        if still_tracked {
                            tracing::warn!(
                                pid = *pid,
                                gupid = %gupid,
                                group = %name,
                                "process disappeared from the OS; detaching"
                            );
                            if let Some(process) = inner
                                .groups
                                .get_mut(name)
                                .and_then(|g| g.process_mut(gupid))
                            {
                                process.set_life_status(ProcessLifeStatus::Dead);
                            }
                            Pool::detach_process_unlocked(shared, &mut inner, gupid, &mut actions);
                            dead += 1;
                        }
                    }
                }
            }
            inner.publish(PoolEvent::MetricsMerged {
                polled: metrics.len(),
                dead,
            });
            if dead > 0 {
                Pool::rebalance(shared, &mut inner, &mut actions);
            }
            Pool::finalize(&mut inner);
        }
        run_actions(actions);
    }
}
