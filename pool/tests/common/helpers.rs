//! Test helpers and builder patterns for pool tests
//!
//! This module provides a pool builder with sensible mock defaults and a
//! gated spawner for tests that need to hold a spawn in flight.

use async_trait::async_trait;
use chrono::Utc;
use pool::{
    MockProcessMetricsSource, MockSpawner, Options, Pool, PoolConfig, PoolResult, Session,
    SpawnError, SpawnedProcess, Spawner,
};
use shared::ProcessMetrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;

use super::fixtures::TestFixtures;

/// Monotonic fake pids so every spawned test process is distinguishable
static NEXT_PID: AtomicU32 = AtomicU32::new(1000);

pub fn next_pid() -> u32 {
    NEXT_PID.fetch_add(1, Ordering::SeqCst)
}

fn fake_spawned_process(concurrency: u32) -> SpawnedProcess {
    SpawnedProcess {
        pid: next_pid(),
        address: "127.0.0.1:4000".parse().unwrap(),
        concurrency,
        creation_time: Utc::now(),
    }
}

/// Builder pattern for creating test pools with sensible defaults
///
/// Background cadences are pushed far out so tests only observe the
/// transitions they drive themselves; the metrics mock reports every pid
/// as alive unless a test overrides it.
pub struct PoolBuilder {
    config: PoolConfig,
    spawner: MockSpawner,
    metrics: MockProcessMetricsSource,
    default_metrics: bool,
}

impl PoolBuilder {
    pub fn new() -> Self {
        let config = PoolConfig {
            max: TestFixtures::DEFAULT_MAX,
            max_idle_time: Duration::from_secs(300),
            preloader_idle_time: Duration::from_secs(3600),
            metrics_interval: Duration::from_secs(3600),
            self_checking: true,
            expensive_checks: true,
            recreate_shut_down_groups: true,
        };

        let mut spawner = MockSpawner::new();
        spawner.expect_terminate().returning(|_| ()).times(0..);
        spawner.expect_cleanup_idle().returning(|_| ()).times(0..);

        Self {
            config,
            spawner,
            metrics: MockProcessMetricsSource::new(),
            default_metrics: true,
        }
    }

    pub fn with_max(mut self, max: u32) -> Self {
        self.config.max = max;
        self
    }

    pub fn with_max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.config.max_idle_time = max_idle_time;
        self
    }

    pub fn with_metrics_interval(mut self, interval: Duration) -> Self {
        self.config.metrics_interval = interval;
        self
    }

    pub fn with_config<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut PoolConfig),
    {
        setup(&mut self.config);
        self
    }

    /// Configure the spawner mock with a setup function
    pub fn with_spawner<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockSpawner),
    {
        setup(&mut self.spawner);
        self
    }

    /// Configure the metrics source mock with a setup function
    pub fn with_metrics<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&mut MockProcessMetricsSource),
    {
        setup(&mut self.metrics);
        self.default_metrics = false;
        self
    }

    /// Spawner answers every spawn with a fresh single-concurrency process
    pub fn with_successful_spawns(self) -> Self {
        self.with_spawner(|spawner| {
            spawner
                .expect_spawn()
                .returning(|_| Ok(fake_spawned_process(1)))
                .times(0..);
        })
    }

    /// Spawner answers every spawn with an unbounded-concurrency process
    pub fn with_unbounded_spawns(self) -> Self {
        self.with_spawner(|spawner| {
            spawner
                .expect_spawn()
                .returning(|_| Ok(fake_spawned_process(0)))
                .times(0..);
        })
    }

    /// Spawner fails every spawn with the same error
    pub fn with_failing_spawns(self, message: &'static str) -> Self {
        self.with_spawner(|spawner| {
            spawner
                .expect_spawn()
                .returning(move |options| Err(SpawnError::new(options.app_group_name, message)))
                .times(0..);
        })
    }

    pub fn build(mut self) -> Pool {
        if self.default_metrics {
            self.metrics
                .expect_collect()
                .returning(|pids| {
                    pids.into_iter()
                        .map(|pid| (pid, ProcessMetrics::default()))
                        .collect::<HashMap<u32, ProcessMetrics>>()
                })
                .times(0..);
        }
        Pool::with_metrics_source(self.config, Arc::new(self.spawner), Arc::new(self.metrics))
            .expect("test pool must build")
    }

    /// Build with a caller-provided spawner implementation
    pub fn build_with_spawner(mut self, spawner: Arc<dyn Spawner>) -> Pool {
        if self.default_metrics {
            self.metrics
                .expect_collect()
                .returning(|pids| {
                    pids.into_iter()
                        .map(|pid| (pid, ProcessMetrics::default()))
                        .collect::<HashMap<u32, ProcessMetrics>>()
                })
                .times(0..);
        }
        Pool::with_metrics_source(self.config, spawner, Arc::new(self.metrics))
            .expect("test pool must build")
    }
}

impl Default for PoolBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Spawner whose spawns block until the test releases them
///
/// Useful for observing the pool while a spawn is in flight (detach races,
/// shut-down group policy).
pub struct GatedSpawner {
    gate: Semaphore,
    concurrency: u32,
}

impl GatedSpawner {
    pub fn new(concurrency: u32) -> Arc<Self> {
        Arc::new(Self {
            gate: Semaphore::new(0),
            concurrency,
        })
    }

    /// Let `count` pending (or future) spawns complete
    pub fn release(&self, count: usize) {
        self.gate.add_permits(count);
    }
}

#[async_trait]
impl Spawner for GatedSpawner {
    async fn spawn(&self, options: Options) -> Result<SpawnedProcess, SpawnError> {
        let permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| SpawnError::new(options.app_group_name, "spawner gate closed"))?;
        permit.forget();
        Ok(fake_spawned_process(self.concurrency))
    }

    async fn terminate(&self, _process: Arc<pool::ProcessHandle>) {}

    async fn cleanup_idle(&self, _app_group_name: String) {}
}

/// Helper functions for common test operations
pub struct TestHelpers;

impl TestHelpers {
    /// `get` with a hard upper bound so a scheduling bug fails fast
    pub async fn get_session(pool: &Pool, options: &Options) -> PoolResult<Session> {
        tokio::time::timeout(Duration::from_secs(2), pool.get(options))
            .await
            .expect("get did not resolve in time")
    }

    /// Poll `condition` until it holds or the deadline passes
    pub async fn eventually<F>(timeout: Duration, mut condition: F)
    where
        F: FnMut() -> bool,
    {
        let deadline = tokio::time::Instant::now() + timeout;
        while !condition() {
            if tokio::time::Instant::now() >= deadline {
                panic!("condition not met within {timeout:?}");
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Wait until the pool settles at the given live process count
    pub async fn wait_for_process_count(pool: &Pool, count: u32) {
        let pool = pool.clone();
        Self::eventually(Duration::from_secs(2), move || {
            pool.get_process_count() == count
        })
        .await;
    }
}
