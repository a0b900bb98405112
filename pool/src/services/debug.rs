//! Debug mailbox: lifecycle events for tests and diagnostics

use shared::PoolEvent;
use tokio::sync::mpsc;

/// Bounded event sink the pool posts to when debugging is enabled
///
/// Posting never blocks; when the consumer falls behind, events are dropped
/// rather than stalling the supervisor. Production pools carry no mailbox
/// and pay a single `Option` check per event site.
pub struct DebugSupport {
    events_tx: mpsc::Sender<PoolEvent>,
}

impl DebugSupport {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<PoolEvent>) {
        let (events_tx, events_rx) = mpsc::channel(capacity.max(1));
        (Self { events_tx }, events_rx)
    }

    pub(crate) fn publish(&self, event: PoolEvent) {
        let _ = self.events_tx.try_send(event);
    }
}
