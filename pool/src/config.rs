//! Pool-wide configuration

use crate::error::{PoolError, PoolResult};
use std::time::Duration;

/// Tunables for the pool supervisor
///
/// Everything here is a pool-wide default; per-group limits ride on
/// [`Options`](crate::core::Options) instead.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Global ceiling on live plus being-spawned processes
    pub max: u32,

    /// How long a process may sit idle before the garbage collector evicts it
    pub max_idle_time: Duration,

    /// How long a group's preloader may sit idle before it is retired
    pub preloader_idle_time: Duration,

    /// Cadence of the OS metrics collector
    pub metrics_interval: Duration,

    /// Run the cheap invariant checks on every lock release
    pub self_checking: bool,

    /// Also run the full-traversal invariant checks (tests only; implies
    /// `self_checking`)
    pub expensive_checks: bool,

    /// Policy for a `get` that targets a group currently shutting down:
    /// `true` resurrects the group, `false` fails the request with
    /// [`PoolError::GroupShuttingDown`]
    pub recreate_shut_down_groups: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max: 6,
            max_idle_time: Duration::from_secs(300),
            preloader_idle_time: Duration::from_secs(300),
            metrics_interval: Duration::from_secs(5),
            self_checking: true,
            expensive_checks: false,
            recreate_shut_down_groups: true,
        }
    }
}

impl PoolConfig {
    pub fn validate(&self) -> PoolResult<()> {
        if self.max == 0 {
            return Err(PoolError::InvalidConfig {
                field: "max".to_string(),
                value: "0".to_string(),
            });
        }
        if self.metrics_interval.is_zero() {
            return Err(PoolError::InvalidConfig {
                field: "metrics_interval".to_string(),
                value: "0s".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(PoolConfig::default().validate().is_ok());
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let config = PoolConfig {
            max: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PoolError::InvalidConfig { field, .. }) if field == "max"
        ));
    }
}
