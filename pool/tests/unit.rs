//! Unit tests for individual pool components
//!
//! These tests verify specific functionality of single operations through
//! the public facade, using clean, maintainable test patterns.

mod common;
use common::{PoolBuilder, TestFixtures, TestHelpers};

use pool::{DisableResult, InspectOptions, PoolError, PoolLifeStatus};
use shared::GroupSecret;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A freshly built pool owns nothing and accepts work
#[tokio::test]
async fn test_empty_pool_state() {
    let pool = PoolBuilder::new().with_successful_spawns().build();

    assert_eq!(pool.capacity_used(), 0);
    assert_eq!(pool.get_process_count(), 0);
    assert_eq!(pool.get_group_count(), 0);
    assert!(!pool.at_full_capacity());
    assert!(!pool.is_spawning());
    assert_eq!(pool.life_status(), PoolLifeStatus::Alive);
}

/// Invalid configuration is rejected before any service starts
#[tokio::test]
async fn test_invalid_config_rejected() {
    let config = pool::PoolConfig {
        max: 0,
        ..pool::PoolConfig::default()
    };
    let result = pool::Pool::new(config, Arc::new(pool::MockSpawner::new()));
    assert!(matches!(
        result,
        Err(PoolError::InvalidConfig { field, .. }) if field == "max"
    ));
}

/// find_or_create_group files the group once and keeps its secret stable
#[tokio::test]
async fn test_find_or_create_group_is_idempotent() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let options = TestFixtures::options(TestFixtures::GROUP_A);

    let first = pool.find_or_create_group(&options);
    let second = pool.find_or_create_group(&options);

    assert_eq!(pool.get_group_count(), 1);
    assert_eq!(first.name, TestFixtures::GROUP_A);
    assert_eq!(first.secret, second.secret);
}

/// Group secrets authenticate lookup and detach
#[tokio::test]
async fn test_group_secret_operations() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let options = TestFixtures::options(TestFixtures::GROUP_A);

    let snapshot = pool.find_or_create_group(&options);
    let secret = GroupSecret::from_string(&snapshot.secret.expect("secrets requested")).unwrap();

    let found = pool.find_group_by_secret(&secret).expect("group by secret");
    assert_eq!(found.name, TestFixtures::GROUP_A);

    assert!(pool.detach_group_by_secret(&secret));
    assert_eq!(pool.get_group_count(), 0);
    assert!(!pool.detach_group_by_secret(&secret));
}

/// Equally busy processes are used in rotation
#[tokio::test]
async fn test_round_robin_across_equally_busy_processes() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let options = TestFixtures::options(TestFixtures::GROUP_A);

    // bring up two processes by holding two sessions, then release them
    let s1 = TestHelpers::get_session(&pool, &options).await.unwrap();
    let s2 = TestHelpers::get_session(&pool, &options).await.unwrap();
    let (pid_a, pid_b) = (s1.pid(), s2.pid());
    assert_ne!(pid_a, pid_b);
    drop(s1);
    drop(s2);

    // sequential get/close alternates between the two idle processes
    let mut picked = Vec::new();
    for _ in 0..4 {
        let session = TestHelpers::get_session(&pool, &options).await.unwrap();
        picked.push(session.pid());
    }
    assert_eq!(picked[0], picked[2]);
    assert_eq!(picked[1], picked[3]);
    assert_ne!(picked[0], picked[1]);
}

/// A pending get can be canceled exactly once
#[tokio::test]
async fn test_cancel_pending_get() {
    let pool = PoolBuilder::new().with_max(1).with_successful_spawns().build();
    let options_a = TestFixtures::options(TestFixtures::GROUP_A);
    let options_b = TestFixtures::options(TestFixtures::GROUP_B);

    let _held = TestHelpers::get_session(&pool, &options_a).await.unwrap();

    let result = Arc::new(std::sync::Mutex::new(None));
    let result_in = result.clone();
    let ticket = pool.async_get(
        &options_b,
        Box::new(move |r| {
            *result_in.lock().unwrap() = Some(r.map(|_| ()));
        }),
    );

    assert!(pool.cancel_get(ticket));
    assert!(!pool.cancel_get(ticket));

    let resolved = result.lock().unwrap().take().expect("callback fired");
    assert!(matches!(resolved, Err(PoolError::RequestCanceled)));
    assert_eq!(pool.capacity_used(), 1);
}

/// Out-of-band work routes new sessions away until the window closes
#[tokio::test]
async fn test_oob_work_window() {
    let pool = PoolBuilder::new().with_unbounded_spawns().build();
    let mut options = TestFixtures::options(TestFixtures::GROUP_A);
    options.max_processes = 1;

    let session = TestHelpers::get_session(&pool, &options).await.unwrap();
    let gupid = session.gupid().clone();
    drop(session);

    assert!(pool.start_oob_work(&gupid));
    // double entry is refused
    assert!(!pool.start_oob_work(&gupid));

    // the only process is busy with maintenance and the group may not grow
    let served = Arc::new(AtomicUsize::new(0));
    let served_in = served.clone();
    pool.async_get(
        &options,
        Box::new(move |result| {
            assert!(result.is_ok());
            served_in.fetch_add(1, Ordering::SeqCst);
        }),
    );
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(served.load(Ordering::SeqCst), 0);

    assert!(pool.finish_oob_work(&gupid));
    TestHelpers::eventually(Duration::from_secs(1), || served.load(Ordering::SeqCst) == 1).await;
}

/// Enable after disable restores the process to rotation (identity law)
#[tokio::test]
async fn test_enable_disable_is_identity_on_idle_process() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let options = TestFixtures::options(TestFixtures::GROUP_A);

    let session = TestHelpers::get_session(&pool, &options).await.unwrap();
    let gupid = session.gupid().clone();
    let pid = session.pid();
    drop(session);

    assert_eq!(pool.disable_process(&gupid).await, DisableResult::Success);
    let disabled = pool.find_process_by_gupid(&gupid).expect("still tracked");
    assert_eq!(disabled.enabled, "disabled");

    assert!(pool.enable_process(&gupid));
    let enabled = pool.find_process_by_gupid(&gupid).expect("still tracked");
    assert_eq!(enabled.enabled, "enabled");

    // the same process serves again
    let session = TestHelpers::get_session(&pool, &options).await.unwrap();
    assert_eq!(session.pid(), pid);
}

/// Disabling an unknown process is a no-op, not an error
#[tokio::test]
async fn test_disable_unknown_process() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let gupid = shared::Gupid::new();
    assert_eq!(pool.disable_process(&gupid).await, DisableResult::Noop);
    assert!(!pool.enable_process(&gupid));
}

/// Process lookup by pid and gupid agree
#[tokio::test]
async fn test_process_lookup() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let options = TestFixtures::options(TestFixtures::GROUP_A);

    let session = TestHelpers::get_session(&pool, &options).await.unwrap();
    let pid = session.pid();
    let gupid = session.gupid().clone();

    let by_pid = pool.find_process_by_pid(pid).expect("by pid");
    let by_gupid = pool.find_process_by_gupid(&gupid).expect("by gupid");
    assert_eq!(by_pid.gupid, by_gupid.gupid);
    assert_eq!(by_pid.sessions, 1);
    assert_eq!(pool.get_processes().len(), 1);

    assert!(pool.detach_process_by_pid(pid));
    assert!(pool.find_process_by_pid(pid).is_none());
}

/// inspect() and to_xml() reflect the live data model
#[tokio::test]
async fn test_inspection_rendering() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let options = TestFixtures::options(TestFixtures::GROUP_A);
    let session = TestHelpers::get_session(&pool, &options).await.unwrap();

    let text = pool.inspect(&InspectOptions::default());
    assert!(text.contains(TestFixtures::GROUP_A));
    assert!(text.contains(&format!("PID: {}", session.pid())));

    let verbose = pool.inspect(&InspectOptions {
        colorize: false,
        verbose: true,
    });
    assert!(verbose.contains("Gupid:"));

    let with_secrets = pool.to_xml(true);
    assert!(with_secrets.contains("<secret>"));
    let without_secrets = pool.to_xml(false);
    assert!(!without_secrets.contains("<secret>"));
    assert!(without_secrets.contains("<pid>"));
}

/// Raising max drains the pool-level wait-list
#[tokio::test]
async fn test_set_max_increase_unblocks_waiters() {
    let pool = PoolBuilder::new().with_max(1).with_successful_spawns().build();
    let options_a = TestFixtures::options(TestFixtures::GROUP_A);
    let options_b = TestFixtures::options(TestFixtures::GROUP_B);

    let _held = TestHelpers::get_session(&pool, &options_a).await.unwrap();

    let served = Arc::new(AtomicUsize::new(0));
    let served_in = served.clone();
    pool.async_get(
        &options_b,
        Box::new(move |result| {
            assert!(result.is_ok());
            served_in.fetch_add(1, Ordering::SeqCst);
        }),
    );
    assert!(pool.at_full_capacity());

    pool.set_max(2);
    TestHelpers::eventually(Duration::from_secs(1), || served.load(Ordering::SeqCst) == 1).await;
    assert_eq!(pool.capacity_used(), 2);
}

/// Lowering max below usage detaches nothing; churn converges instead
#[tokio::test]
async fn test_set_max_decrease_is_graceful() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let options = TestFixtures::options(TestFixtures::GROUP_A);

    let s1 = TestHelpers::get_session(&pool, &options).await.unwrap();
    let s2 = TestHelpers::get_session(&pool, &options).await.unwrap();

    pool.set_max(1);
    assert_eq!(pool.get_process_count(), 2);
    assert!(pool.at_full_capacity());

    drop(s1);
    drop(s2);
    assert_eq!(pool.get_process_count(), 2);
}

/// Capacity accounting matches what walking the groups recovers
#[tokio::test]
async fn test_capacity_accounting_is_consistent() {
    let pool = PoolBuilder::new().with_successful_spawns().build();

    let s1 = TestHelpers::get_session(&pool, &TestFixtures::options(TestFixtures::GROUP_A))
        .await
        .unwrap();
    let s2 = TestHelpers::get_session(&pool, &TestFixtures::options(TestFixtures::GROUP_B))
        .await
        .unwrap();

    let snapshot = pool.snapshot(false);
    let walked: u32 = snapshot
        .groups
        .iter()
        .map(|g| g.enabled_count + g.disabling_count + g.disabled_count + g.processes_being_spawned)
        .sum();
    assert_eq!(snapshot.capacity_used, walked);
    assert_eq!(pool.capacity_used(), 2);

    drop(s1);
    drop(s2);
    assert_eq!(pool.capacity_used(), pool.get_process_count());
}

/// Debug mailbox carries the lifecycle of a first request
#[tokio::test]
async fn test_debug_events_for_first_get() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let mut events = pool.enable_debug_events(64);
    let options = TestFixtures::options(TestFixtures::GROUP_A);

    let _session = TestHelpers::get_session(&pool, &options).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = tokio::time::timeout(Duration::from_millis(200), events.recv()).await {
        match event {
            Some(event) => {
                let done = matches!(event, shared::PoolEvent::SessionOpened { .. });
                seen.push(event);
                if done {
                    break;
                }
            }
            None => break,
        }
    }

    assert!(seen
        .iter()
        .any(|e| matches!(e, shared::PoolEvent::GroupCreated { group } if group == TestFixtures::GROUP_A)));
    assert!(seen
        .iter()
        .any(|e| matches!(e, shared::PoolEvent::SpawnStarted { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, shared::PoolEvent::SpawnSucceeded { .. })));
    assert!(seen
        .iter()
        .any(|e| matches!(e, shared::PoolEvent::SessionOpened { .. })));
}

/// A session keeps its endpoint after the process is detached mid-request
#[tokio::test]
async fn test_session_survives_mid_request_detach() {
    let pool = PoolBuilder::new().with_successful_spawns().build();
    let options = TestFixtures::options(TestFixtures::GROUP_A);

    let session = TestHelpers::get_session(&pool, &options).await.unwrap();
    assert!(session.process_attached());

    assert!(pool.detach_process_by_gupid(&session.gupid().clone()));
    assert!(!session.process_attached());
    assert_eq!(pool.get_process_count(), 0);

    // closing the orphaned session is harmless
    drop(session);
    assert_eq!(pool.capacity_used(), 0);
}

/// Options carry group identity; differing parameters join the same group
#[tokio::test]
async fn test_options_with_same_group_name_share_a_group() {
    let pool = PoolBuilder::new().with_unbounded_spawns().build();
    let options_v1 = TestFixtures::options(TestFixtures::GROUP_A);
    let options_v2 = TestFixtures::options_with_budget(TestFixtures::GROUP_A, 100);

    let s1 = TestHelpers::get_session(&pool, &options_v1).await.unwrap();
    let s2 = TestHelpers::get_session(&pool, &options_v2).await.unwrap();

    assert_eq!(pool.get_group_count(), 1);
    assert_eq!(s1.pid(), s2.pid());
}
