//! # bazaar-relay
//!
//! Payment-gated admission for a Nostr relay that stores auction and bid
//! events.
//!
//! The crate decides whether each submitted event is stored straight away,
//! held until a Lightning charge is paid, or rejected. Transport (NIP-01
//! websockets) and the storage engine are collaborators behind traits; the
//! payment rail is an external provider reached over HTTP.
//!
//! ## Architecture
//!
//! ```text
//! submit(event)
//!      │
//!      ▼
//! AdmissionEngine ──price == 0──▶ ValidatorRegistry ──▶ Accept / Reject
//!      │
//!   price > 0
//!      │
//!      ▼
//! PendingLedger.reserve ──existing──▶ Pending(charge)
//!      │
//!    claim
//!      ▼
//! InvoiceGateway.create_charge ──▶ commit ──▶ Pending(charge)
//!
//!            ... later ...
//!
//! POST /payment-update/{ref} ──▶ WebhookHandler ──▶ PendingLedger.resolve
//!                                                     │
//!                                            paid ────┴──── failed/expired
//!                                             │                  │
//!                                        store.save           discard
//! ```
//!
//! ## Example
//!
//! ```rust,no_run
//! use bazaar_relay::{RelayBuilder, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = RelayConfig::default();
//!     let mut relay = RelayBuilder::new(config).build().await?;
//!     relay.run().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

pub mod admission;
pub mod config;
pub mod error;
pub mod event;
pub mod http;
pub mod nostr;
pub mod payment;
pub mod relay;
pub mod store;
pub mod validation;

pub use admission::{AdmissionConfig, AdmissionEngine, Outcome, RejectKind, Rejection};
pub use config::{PaymentConfig, RelayConfig, UnknownKindPolicy};
pub use error::{Error, Result};
pub use event::{RelayEvent, RelayEventsChannel};
pub use nostr::{Event, Filter};
pub use payment::{
    ChargeRef, ChargeStatus, InvoiceGateway, PaymentWebhookHandler, PendingCharge, PendingLedger,
    WebhookOutcome, ZebedeeGateway,
};
pub use relay::{Relay, RelayBuilder, RelayInfo, RunningRelay, ShutdownHandle};
pub use store::{EventStore, MemoryEventStore};
pub use validation::{EventValidator, ValidatorRegistry, Verdict};
