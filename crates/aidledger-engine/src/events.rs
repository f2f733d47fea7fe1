//! Broadcast hub for ledger state transitions.

use aidledger_core::LedgerEvent;
use tokio::sync::broadcast;
use tracing::{debug, info};

#[derive(Clone)]
pub struct EventHub {
    tx: broadcast::Sender<LedgerEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: LedgerEvent) {
        info!(kind = event.kind(), "ledger event");
        // Zero subscribers is a normal state, not a failure.
        if self.tx.send(event).is_err() {
            debug!("ledger event had no subscribers");
        }
    }
}
