//! Pool lifecycle event messages
//!
//! The supervisor posts these to its debug mailbox when one is attached.
//! Tests and diagnostic tooling consume them to observe state transitions
//! without poking at pool internals.

use crate::types::Gupid;
use serde::{Deserialize, Serialize};

/// A state transition inside the pool supervisor
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PoolEvent {
    GroupCreated {
        group: String,
    },
    GroupDetached {
        group: String,
    },
    SpawnStarted {
        group: String,
    },
    SpawnSucceeded {
        group: String,
        gupid: Gupid,
        pid: u32,
    },
    SpawnFailed {
        group: String,
        error: String,
    },
    ProcessDetached {
        group: String,
        gupid: Gupid,
    },
    ProcessDisabled {
        group: String,
        gupid: Gupid,
    },
    ProcessEnabled {
        group: String,
        gupid: Gupid,
    },
    SessionOpened {
        gupid: Gupid,
    },
    SessionClosed {
        gupid: Gupid,
    },
    WaiterTimedOut {
        group: Option<String>,
    },
    RestartInitiated {
        group: String,
    },
    RestartCompleted {
        group: String,
    },
    GarbageCollected {
        detached_processes: usize,
        detached_groups: usize,
    },
    MetricsMerged {
        polled: usize,
        dead: usize,
    },
    ShutdownPrepared,
}

impl PoolEvent {
    /// Group name the event concerns, when it concerns one
    pub fn group_name(&self) -> Option<&str> {
        match self {
            PoolEvent::GroupCreated { group }
            | PoolEvent::GroupDetached { group }
            | PoolEvent::SpawnStarted { group }
            | PoolEvent::SpawnSucceeded { group, .. }
            | PoolEvent::SpawnFailed { group, .. }
            | PoolEvent::ProcessDetached { group, .. }
            | PoolEvent::ProcessDisabled { group, .. }
            | PoolEvent::ProcessEnabled { group, .. }
            | PoolEvent::RestartInitiated { group }
            | PoolEvent::RestartCompleted { group } => Some(group),
            PoolEvent::WaiterTimedOut { group } => group.as_deref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_group_name() {
        let event = PoolEvent::GroupCreated {
            group: "app".to_string(),
        };
        assert_eq!(event.group_name(), Some("app"));

        let event = PoolEvent::ShutdownPrepared;
        assert_eq!(event.group_name(), None);
    }

    #[test]
    fn test_event_serialization_roundtrip() {
        let event = PoolEvent::SpawnSucceeded {
            group: "app".to_string(),
            gupid: Gupid::new(),
            pid: 4242,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: PoolEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
