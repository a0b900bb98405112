//! Request admission key and per-group defaults

use std::time::Duration;

/// How new worker processes are brought up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMethod {
    /// Fork from a long-lived preloader; spawns are serialized per group
    Smart,
    /// Boot each worker from scratch; parallel spawn bursts are allowed
    Direct,
}

/// How a group restart replaces its processes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMethod {
    /// Detach every process immediately, then respawn
    Blocking,
    /// Keep old processes serving until their replacements are up
    Rolling,
}

/// Describes one `get` request and, on first contact, the group it creates
///
/// Two `Options` with equal `app_group_name` address the same [`Group`]; all
/// other fields are frozen into the group when it is created and act as that
/// group's defaults from then on.
///
/// [`Group`]: crate::core::group::Group
#[derive(Debug, Clone)]
pub struct Options {
    /// Group identity; every process serving the same application shares it
    pub app_group_name: String,

    /// Filesystem root of the application
    pub app_root: String,

    /// OS user the application runs as
    pub user: String,

    /// Deployment environment name (production, staging, ...)
    pub environment: String,

    /// Processes the pool keeps alive for this group even when idle
    pub min_processes: u32,

    /// Per-group process ceiling; 0 means bounded only by the pool
    pub max_processes: u32,

    /// Requests a process may serve before it is retired; 0 disables
    pub max_requests: u64,

    /// How long a queued request waits before it times out
    pub start_timeout: Duration,

    pub spawn_method: SpawnMethod,

    pub restart_method: RestartMethod,

    /// Ceiling on queued requests for this group (and for the pool-level
    /// queue while the group does not exist yet); 0 means unbounded
    pub max_wait_queue_size: usize,
}

impl Options {
    /// Options for an application rooted at `app_root`, with the group named
    /// after the root
    pub fn for_app_root(app_root: impl Into<String>) -> Self {
        let app_root = app_root.into();
        Self {
            app_group_name: app_root.clone(),
            app_root,
            ..Self::default()
        }
    }

    pub fn with_app_group_name(mut self, name: impl Into<String>) -> Self {
        self.app_group_name = name.into();
        self
    }

    pub fn with_min_processes(mut self, min: u32) -> Self {
        self.min_processes = min;
        self
    }

    pub fn with_max_processes(mut self, max: u32) -> Self {
        self.max_processes = max;
        self
    }

    pub fn with_max_requests(mut self, max: u64) -> Self {
        self.max_requests = max;
        self
    }

    pub fn with_start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Key under which the pool files the matching group
    pub fn group_key(&self) -> &str {
        &self.app_group_name
    }

    /// Whether this group may run `count` processes
    pub fn allows_process_count(&self, count: u32) -> bool {
        self.max_processes == 0 || count < self.max_processes
    }
}

impl Default for Options {
    fn default() -> Self {
        Self {
            app_group_name: String::new(),
            app_root: String::new(),
            user: "nobody".to_string(),
            environment: "production".to_string(),
            min_processes: 1,
            max_processes: 0,
            max_requests: 0,
            start_timeout: Duration::from_secs(90),
            spawn_method: SpawnMethod::Smart,
            restart_method: RestartMethod::Blocking,
            max_wait_queue_size: 100,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_group_name_means_same_group() {
        let a = Options::for_app_root("/srv/app").with_min_processes(0);
        let b = Options::for_app_root("/srv/app").with_max_requests(50);
        assert_eq!(a.group_key(), b.group_key());
    }

    #[test]
    fn test_group_name_can_diverge_from_root() {
        let opts = Options::for_app_root("/srv/app").with_app_group_name("app-canary");
        assert_eq!(opts.group_key(), "app-canary");
        assert_eq!(opts.app_root, "/srv/app");
    }

    #[test]
    fn test_unbounded_group_allows_any_count() {
        let opts = Options::for_app_root("/srv/app").with_max_processes(0);
        assert!(opts.allows_process_count(10_000));

        let opts = opts.with_max_processes(2);
        assert!(opts.allows_process_count(1));
        assert!(!opts.allows_process_count(2));
    }
}
