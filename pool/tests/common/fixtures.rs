//! Test fixtures and data for pool tests
//!
//! This module provides consistent request options and constants used
//! across all test suites.

use pool::{Options, SpawnMethod};
use std::time::Duration;

/// Standard test data and fixtures
pub struct TestFixtures;

impl TestFixtures {
    /// Application group identities used across the suites
    pub const GROUP_A: &'static str = "/srv/apps/alpha";
    pub const GROUP_B: &'static str = "/srv/apps/beta";
    pub const GROUP_C: &'static str = "/srv/apps/gamma";

    /// Default global ceiling for test pools
    pub const DEFAULT_MAX: u32 = 6;

    /// Options with no idle floor and a generous queue timeout
    ///
    /// `min_processes == 0` keeps spawns strictly demand-driven, which makes
    /// capacity arithmetic in the assertions exact.
    pub fn options(group: &str) -> Options {
        let mut options = Options::for_app_root(group).with_min_processes(0);
        options.spawn_method = SpawnMethod::Direct;
        options.start_timeout = Duration::from_secs(5);
        options
    }

    /// Options whose processes retire after `max_requests` served requests
    pub fn options_with_budget(group: &str, max_requests: u64) -> Options {
        Self::options(group).with_max_requests(max_requests)
    }

    /// Options with a tight queue deadline, for timeout tests
    pub fn options_with_timeout(group: &str, timeout: Duration) -> Options {
        Self::options(group).with_start_timeout(timeout)
    }
}
