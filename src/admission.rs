//! Admission decision engine.
//!
//! Decides, for each submitted event, whether it is rejected, accepted
//! straight away, or held pending payment.
//!
//! ```text
//! price > 0  ──▶ already stored? ──▶ accept
//!                 └─▶ ledger.reserve ──▶ existing charge | new charge | reject
//! price == 0 ──▶ ValidatorRegistry ──▶ pass | fail | unknown-kind policy
//! ```

use crate::config::{RelayConfig, UnknownKindPolicy};
use crate::event::{RelayEvent, RelayEventsSender};
use crate::nostr::{Event, Filter};
use crate::payment::{
    ChargeRef, ChargeRequest, InvoiceGateway, PendingCharge, PendingLedger, Reservation,
};
use crate::store::EventStore;
use crate::validation::{ValidatorRegistry, Verdict};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Immutable admission settings, fixed at engine construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionConfig {
    /// Price per event in satoshis. Zero disables gating.
    pub price_sats: u64,
    /// Policy for kinds without a validator when gating is off.
    pub unknown_kinds: UnknownKindPolicy,
    /// Public base URL used to build webhook callback URLs.
    pub relay_url: String,
    /// Description attached to each charge.
    pub charge_description: String,
}

impl AdmissionConfig {
    /// Whether every event must be paid for.
    #[must_use]
    pub fn gating_enabled(&self) -> bool {
        self.price_sats > 0
    }

    /// Callback URL the provider calls for the charge gating `event_id`.
    #[must_use]
    pub fn callback_url(&self, event_id: &str) -> String {
        format!(
            "{}/payment-update/{event_id}",
            self.relay_url.trim_end_matches('/')
        )
    }
}

impl From<&RelayConfig> for AdmissionConfig {
    fn from(config: &RelayConfig) -> Self {
        Self {
            price_sats: config.payment.price_sats,
            unknown_kinds: config.unknown_kinds,
            relay_url: config.relay_url.clone(),
            charge_description: config.payment.charge_description.clone(),
        }
    }
}

/// Why an event was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectKind {
    /// The event failed structural validation.
    Invalid,
    /// The event kind is not accepted by policy.
    Blocked,
    /// A charge could not be created.
    PaymentBackendUnavailable,
}

impl RejectKind {
    /// NIP-01 machine-readable prefix.
    #[must_use]
    pub fn prefix(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::Blocked => "blocked",
            Self::PaymentBackendUnavailable => "error",
        }
    }
}

/// A rejection and its human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    /// Category.
    pub kind: RejectKind,
    /// Reason reported to the submitter.
    pub reason: String,
}

impl Rejection {
    /// A validation failure.
    #[must_use]
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::Invalid,
            reason: reason.into(),
        }
    }

    /// A policy refusal.
    #[must_use]
    pub fn blocked(reason: impl Into<String>) -> Self {
        Self {
            kind: RejectKind::Blocked,
            reason: reason.into(),
        }
    }

    /// The payment provider could not be reached.
    #[must_use]
    pub fn payment_backend_unavailable() -> Self {
        Self {
            kind: RejectKind::PaymentBackendUnavailable,
            reason: "payment backend unavailable".to_string(),
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind.prefix(), self.reason)
    }
}

/// Decision for a submitted event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Refuse the event.
    Reject(Rejection),
    /// Store the event now.
    Accept,
    /// Hold the event until the charge is paid.
    Pending(ChargeRef),
}

/// Decides the fate of submitted events.
pub struct AdmissionEngine {
    config: AdmissionConfig,
    validators: ValidatorRegistry,
    ledger: PendingLedger,
    gateway: Arc<dyn InvoiceGateway>,
    store: Arc<dyn EventStore>,
    events_tx: Option<RelayEventsSender>,
}

impl AdmissionEngine {
    /// Create an engine. `store` is consulted so that events already
    /// admitted are never billed again.
    #[must_use]
    pub fn new(
        config: AdmissionConfig,
        validators: ValidatorRegistry,
        ledger: PendingLedger,
        gateway: Arc<dyn InvoiceGateway>,
        store: Arc<dyn EventStore>,
    ) -> Self {
        info!(
            "Admission engine initialized (gating={}, price_sats={}, unknown_kinds={:?})",
            config.gating_enabled(),
            config.price_sats,
            config.unknown_kinds
        );
        Self {
            config,
            validators,
            ledger,
            gateway,
            store,
            events_tx: None,
        }
    }

    /// Broadcast charge creation on `events_tx`.
    #[must_use]
    pub fn with_events(mut self, events_tx: RelayEventsSender) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    /// Decide what to do with `event`.
    pub async fn decide(&self, event: &Event) -> Outcome {
        if self.config.gating_enabled() {
            return self.gate(event).await;
        }

        match self.validators.validate(event).await {
            Some(Verdict::Pass) => Outcome::Accept,
            Some(Verdict::Fail(reason)) => Outcome::Reject(Rejection::invalid(reason)),
            None => match self.config.unknown_kinds {
                UnknownKindPolicy::Accept => Outcome::Accept,
                UnknownKindPolicy::Reject => Outcome::Reject(Rejection::blocked(format!(
                    "kind {} is not accepted by this relay",
                    event.kind
                ))),
            },
        }
    }

    /// Return the pending charge for `event`, creating it if needed.
    async fn gate(&self, event: &Event) -> Outcome {
        match self.store.query(&Filter::id(&event.id)).await {
            Ok(found) if !found.is_empty() => {
                debug!("Event {} already stored, not charging again", event.short_id());
                return Outcome::Accept;
            }
            Ok(_) => {}
            Err(e) => warn!("Store lookup for event {} failed: {e}", event.short_id()),
        }

        loop {
            match self.ledger.reserve(&event.id) {
                Reservation::Existing(charge) => {
                    debug!(
                        "Event {} already pending under charge {}",
                        event.short_id(),
                        charge.charge_id
                    );
                    return Outcome::Pending(charge.to_ref());
                }
                Reservation::Busy(waiter) => waiter.wait().await,
                Reservation::Claimed(claim) => {
                    let request = ChargeRequest {
                        amount_sats: self.config.price_sats,
                        description: self.config.charge_description.clone(),
                        reference: event.id.clone(),
                        callback_url: self.config.callback_url(&event.id),
                    };

                    // The claim holds the slot, not the ledger lock, across the call.
                    return match self.gateway.create_charge(&request).await {
                        Ok(charge) => {
                            let pending =
                                PendingCharge::new(charge, event.id.clone(), self.config.price_sats);
                            let pending = claim.commit(pending, event.clone());
                            info!(
                                "Created charge {} for event {}",
                                pending.charge_id,
                                event.short_id()
                            );
                            if let Some(tx) = &self.events_tx {
                                let _ = tx.send(RelayEvent::ChargeCreated {
                                    charge_id: pending.charge_id.clone(),
                                    event_id: event.id.clone(),
                                });
                            }
                            Outcome::Pending(pending.to_ref())
                        }
                        Err(e) => {
                            warn!("Charge creation for event {} failed: {e}", event.short_id());
                            Outcome::Reject(Rejection::payment_backend_unavailable())
                        }
                    };
                }
            }
        }
    }
}
