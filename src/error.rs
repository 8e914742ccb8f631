//! Error types for bazaar-relay.

use thiserror::Error;

/// Result type alias using the crate's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in bazaar-relay.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// The payment provider could not create or report a charge.
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Pending-payment ledger error (snapshot load/persist).
    #[error("ledger error: {0}")]
    Ledger(String),

    /// A paid event could not be written to the store.
    ///
    /// The payer has already been charged, so this needs manual
    /// reconciliation.
    #[error("store write failed for paid event {event_id} (charge {charge_id}): {reason}")]
    StoreWrite {
        /// Charge that was settled.
        charge_id: String,
        /// Event that was not persisted.
        event_id: String,
        /// Underlying store error.
        reason: String,
    },

    /// Event store error.
    #[error("store error: {0}")]
    Store(String),

    /// HTTP server error.
    #[error("http error: {0}")]
    Http(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),
}
