//! Payment gating for event admission.
//!
//! When a price is configured, every submitted event is held in the
//! [`PendingLedger`] until the provider reports its charge as paid.
//!
//! # Architecture
//!
//! ```text
//! gated event
//!      │
//!      ▼
//! ┌─────────────────────┐
//! │ ledger.reserve(id)  │
//! └─────────┬───────────┘
//!           │
//!    ┌──────┼───────────────┐
//!    │      │               │
//! EXISTING  BUSY         CLAIMED
//!    │      │               │
//!    ▼      ▼               ▼
//! reuse   wait, retry   gateway.create_charge
//! charge                    │
//!                    ┌──────┴──────┐
//!                    │             │
//!                   OK           ERROR
//!                    │             │
//!                    ▼             ▼
//!               claim.commit   reject (slot freed)
//! ```
//!
//! Webhook deliveries go through [`PaymentWebhookHandler`], which calls
//! [`PendingLedger::resolve`] exactly once per charge.

mod cache;
mod gateway;
mod ledger;
mod webhook;

pub use cache::{CacheStats, ResolvedCache};
pub use gateway::{Charge, ChargeRequest, InvoiceGateway, ZebedeeGateway};
pub use ledger::{Claim, PendingLedger, Reservation, Resolution, Waiter};
pub use webhook::{PaymentWebhookHandler, WebhookOutcome};

use crate::nostr::Event;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a charge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    /// Awaiting payment.
    Pending,
    /// Paid; the event was released to the store.
    Paid,
    /// The provider let the charge lapse, or the local sweep did.
    Expired,
    /// The provider reported the payment as failed.
    Failed,
}

impl ChargeStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Map a provider status string onto a charge status.
    ///
    /// Returns `None` for statuses this relay does not understand.
    #[must_use]
    pub fn from_provider(status: &str) -> Option<Self> {
        match status.trim().to_ascii_lowercase().as_str() {
            "pending" | "processing" | "unpaid" => Some(Self::Pending),
            "completed" | "paid" | "settled" | "success" => Some(Self::Paid),
            "expired" => Some(Self::Expired),
            "failed" | "error" | "cancelled" | "canceled" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Lowercase name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Expired => "expired",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for ChargeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A charge awaiting payment, correlated with the event it gates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingCharge {
    /// Provider-assigned charge id.
    pub charge_id: String,
    /// Id of the held event.
    pub event_id: String,
    /// Amount in satoshis.
    pub amount_sats: u64,
    /// Payable reference (BOLT11 invoice).
    pub payment_request: String,
    /// Current status.
    pub status: ChargeStatus,
    /// When the charge was created.
    pub created_at: DateTime<Utc>,
}

impl PendingCharge {
    /// A new charge in the `pending` state.
    #[must_use]
    pub fn new(charge: Charge, event_id: impl Into<String>, amount_sats: u64) -> Self {
        Self {
            charge_id: charge.charge_id,
            event_id: event_id.into(),
            amount_sats,
            payment_request: charge.payment_request,
            status: ChargeStatus::Pending,
            created_at: Utc::now(),
        }
    }

    /// The part of the charge handed back to the submitter.
    #[must_use]
    pub fn to_ref(&self) -> ChargeRef {
        ChargeRef {
            charge_id: self.charge_id.clone(),
            payment_request: self.payment_request.clone(),
            amount_sats: self.amount_sats,
        }
    }
}

/// What a submitter needs to pay for a held event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeRef {
    /// Provider-assigned charge id.
    pub charge_id: String,
    /// Payable reference (BOLT11 invoice).
    pub payment_request: String,
    /// Amount in satoshis.
    pub amount_sats: u64,
}

/// A charge together with the event it holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeldEvent {
    /// The charge.
    pub charge: PendingCharge,
    /// The event released on payment.
    pub event: Event,
}
