//! # Event Bus
//!
//! Lifecycle events fan out to subscribers over a bounded tokio broadcast
//! channel. Producers never block and never fail: an event with no
//! listeners is dropped, and a slow subscriber loses old events rather
//! than stalling consensus.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Channel capacity. Large enough to absorb a burst of control-docket
/// application without dropping events for a live subscriber.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Events emitted by the validator core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LedgerEvent {
    /// A leader election concluded.
    LeaderChanged {
        register_id: String,
        term: u64,
        leader_id: Option<String>,
    },
    /// A heartbeat carried a higher term; we adopted its sender.
    HigherTermReceived {
        register_id: String,
        term: u64,
        leader_id: String,
    },
    /// The validator set of a register changed.
    ValidatorListChanged { register_id: String },
    /// A pending validator was approved.
    ValidatorApproved {
        register_id: String,
        validator_id: String,
    },
    /// A pending validator was rejected.
    ValidatorRejected {
        register_id: String,
        validator_id: String,
        reason: String,
    },
    /// A blueprint version publication changed the resolved version.
    VersionChanged {
        register_id: String,
        blueprint_id: String,
    },
    /// One control transaction was applied from a committed docket.
    ControlActionApplied {
        register_id: String,
        tx_id: String,
        action_type: String,
    },
    /// A confirmed docket claimed a proposer that was not the leader for
    /// its term.
    LeaderImpersonation {
        register_id: String,
        term: u64,
        claimed_proposer: String,
        expected_leader: String,
    },
}

/// Shared producer handle for ledger events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<LedgerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Emit an event. Succeeds regardless of subscriber count.
    pub fn emit(&self, event: LedgerEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to the event stream from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscriber_receives_events() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(LedgerEvent::ValidatorListChanged {
            register_id: "reg-1".to_string(),
        });

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            LedgerEvent::ValidatorListChanged {
                register_id: "reg-1".to_string()
            }
        );
    }

    #[test]
    fn emit_without_subscribers_does_not_fail() {
        let bus = EventBus::new();
        bus.emit(LedgerEvent::LeaderChanged {
            register_id: "reg-1".to_string(),
            term: 1,
            leader_id: None,
        });
    }

    #[tokio::test]
    async fn dropped_subscriber_does_not_affect_producer() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        drop(rx);
        bus.emit(LedgerEvent::ValidatorListChanged {
            register_id: "reg-1".to_string(),
        });
    }
}
