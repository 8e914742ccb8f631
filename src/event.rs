//! Relay lifecycle events.

use tokio::sync::broadcast;

/// Events emitted by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayEvent {
    /// Relay has started successfully.
    Started,

    /// Relay is shutting down.
    ShuttingDown,

    /// An event was stored without payment.
    EventAccepted {
        /// Event id.
        event_id: String,
    },

    /// An event was refused.
    EventRejected {
        /// Event id.
        event_id: String,
        /// Rejection reason.
        reason: String,
    },

    /// A charge was created for a gated event.
    ChargeCreated {
        /// Provider charge id.
        charge_id: String,
        /// Event held until payment.
        event_id: String,
    },

    /// A paid event was released into the store.
    EventAdmitted {
        /// Provider charge id.
        charge_id: String,
        /// Event id.
        event_id: String,
    },

    /// A charge failed or expired and its event was dropped.
    ChargeDiscarded {
        /// Provider charge id.
        charge_id: String,
        /// Event id.
        event_id: String,
        /// Terminal status (`failed` or `expired`).
        status: String,
    },

    /// A paid event could not be stored; needs manual reconciliation.
    StoreWriteFailed {
        /// Provider charge id.
        charge_id: String,
        /// Event id.
        event_id: String,
        /// Error message.
        message: String,
    },

    /// Error occurred.
    Error {
        /// Error message.
        message: String,
    },
}

/// Channel for receiving relay events.
pub type RelayEventsChannel = broadcast::Receiver<RelayEvent>;

/// Sender for relay events.
pub type RelayEventsSender = broadcast::Sender<RelayEvent>;

/// Create a new event channel pair.
#[must_use]
pub fn create_event_channel() -> (RelayEventsSender, RelayEventsChannel) {
    broadcast::channel(256)
}
