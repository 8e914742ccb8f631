//! Payment webhook handling.
//!
//! Providers deliver status callbacks at least once, possibly concurrently.
//! Every delivery funnels into [`PendingLedger::resolve`], which lets exactly
//! one of them release the held event; the rest are absorbed as no-ops.
//!
//! A callback only says that something changed. The terminal status
//! applied to the ledger is the one the provider reports through
//! [`InvoiceGateway::charge_status`], never the status in the callback body.

use super::gateway::InvoiceGateway;
use super::ledger::{PendingLedger, Resolution};
use super::{ChargeStatus, PendingCharge};
use crate::error::{Error, Result};
use crate::event::{RelayEvent, RelayEventsSender};
use crate::nostr::Event;
use crate::store::EventStore;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What a webhook delivery did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// The charge was paid and its event stored.
    Admitted {
        /// Charge id.
        charge_id: String,
        /// Stored event id.
        event_id: String,
    },
    /// The charge failed or expired and its event was dropped.
    Discarded {
        /// Charge id.
        charge_id: String,
        /// Dropped event id.
        event_id: String,
        /// Terminal status.
        status: ChargeStatus,
    },
    /// The charge is still awaiting payment.
    StillPending,
    /// Unknown, already resolved, or unrecognised status; nothing changed.
    Ignored,
}

impl WebhookOutcome {
    /// Short name for responses and logs.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admitted { .. } => "admitted",
            Self::Discarded { .. } => "discarded",
            Self::StillPending => "pending",
            Self::Ignored => "ignored",
        }
    }
}

/// Resolves provider callbacks against the ledger.
#[derive(Clone)]
pub struct PaymentWebhookHandler {
    ledger: PendingLedger,
    store: Arc<dyn EventStore>,
    gateway: Arc<dyn InvoiceGateway>,
    events_tx: Option<RelayEventsSender>,
}

impl PaymentWebhookHandler {
    /// Create a handler that confirms statuses with `gateway` and releases
    /// paid events into `store`.
    #[must_use]
    pub fn new(
        ledger: PendingLedger,
        store: Arc<dyn EventStore>,
        gateway: Arc<dyn InvoiceGateway>,
    ) -> Self {
        Self {
            ledger,
            store,
            gateway,
            events_tx: None,
        }
    }

    /// Broadcast outcomes on `events_tx`.
    #[must_use]
    pub fn with_events(mut self, events_tx: RelayEventsSender) -> Self {
        self.events_tx = Some(events_tx);
        self
    }

    fn emit(&self, event: RelayEvent) {
        if let Some(tx) = &self.events_tx {
            let _ = tx.send(event);
        }
    }

    /// Handle a delivery whose URL carries a reference (charge id or event
    /// id) and whose body may name the charge id.
    ///
    /// A body charge id is authoritative: only that charge is considered,
    /// so a late delivery for a resolved charge never lands on a newer
    /// charge for the same event.
    ///
    /// # Errors
    ///
    /// See [`PaymentWebhookHandler::handle_charge`].
    pub async fn handle_delivery(
        &self,
        path_reference: &str,
        body_charge_id: Option<&str>,
        status: &str,
    ) -> Result<WebhookOutcome> {
        match body_charge_id {
            Some(charge_id) => self.handle_charge(charge_id, status).await,
            None => self.handle(path_reference, status).await,
        }
    }

    /// Apply a callback to the charge identified by `reference`, looked up
    /// as a charge id, then as an event id.
    ///
    /// # Errors
    ///
    /// See [`PaymentWebhookHandler::handle_charge`].
    pub async fn handle(&self, reference: &str, status: &str) -> Result<WebhookOutcome> {
        match self.ledger.find(reference) {
            Some(charge) => self.handle_charge(&charge.charge_id, status).await,
            None => self.handle_charge(reference, status).await,
        }
    }

    /// Apply a callback to the charge `charge_id`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Gateway`] if the provider cannot confirm the
    /// charge's status; the charge stays pending. Returns
    /// [`Error::StoreWrite`] if the charge was paid but its event could not
    /// be stored. The charge stays resolved; the failure is logged and
    /// broadcast for manual reconciliation.
    pub async fn handle_charge(&self, charge_id: &str, status: &str) -> Result<WebhookOutcome> {
        let Some(claimed) = ChargeStatus::from_provider(status) else {
            warn!("Ignoring webhook for {charge_id} with unrecognised status {status:?}");
            return Ok(WebhookOutcome::Ignored);
        };

        if self.ledger.get(charge_id).is_none() {
            match self.ledger.resolved_status(charge_id) {
                Some(previous) => {
                    debug!("Duplicate webhook for {charge_id} (already {previous}), ignoring");
                }
                None => debug!("Webhook for unknown reference {charge_id}, ignoring"),
            }
            return Ok(WebhookOutcome::Ignored);
        }

        if !claimed.is_terminal() {
            debug!("Charge {charge_id} still pending");
            return Ok(WebhookOutcome::StillPending);
        }

        let confirmed = self.gateway.charge_status(charge_id).await.map_err(|e| {
            warn!("Could not confirm status of charge {charge_id}: {e}");
            e
        })?;
        if confirmed != claimed {
            warn!("Webhook claims charge {charge_id} is {claimed}, provider reports {confirmed}");
        }
        if !confirmed.is_terminal() {
            return Ok(WebhookOutcome::StillPending);
        }

        match self.ledger.resolve(charge_id, confirmed) {
            Resolution::Resolved {
                charge,
                event: Some(event),
            } => self.admit(charge, &event).await,
            Resolution::Resolved { charge, event: None } => {
                info!(
                    "Charge {} {}; discarded event {}",
                    charge.charge_id, charge.status, charge.event_id
                );
                self.emit(RelayEvent::ChargeDiscarded {
                    charge_id: charge.charge_id.clone(),
                    event_id: charge.event_id.clone(),
                    status: charge.status.to_string(),
                });
                Ok(WebhookOutcome::Discarded {
                    charge_id: charge.charge_id,
                    event_id: charge.event_id,
                    status: charge.status,
                })
            }
            // Lost the race to a concurrent delivery or the expiry sweep.
            Resolution::AlreadyResolved(_) | Resolution::Unknown => Ok(WebhookOutcome::Ignored),
        }
    }

    async fn admit(&self, charge: PendingCharge, event: &Event) -> Result<WebhookOutcome> {
        match self.store.save(event).await {
            Ok(_) => {
                info!(
                    "Charge {} paid; stored event {}",
                    charge.charge_id,
                    event.short_id()
                );
                self.emit(RelayEvent::EventAdmitted {
                    charge_id: charge.charge_id.clone(),
                    event_id: event.id.clone(),
                });
                Ok(WebhookOutcome::Admitted {
                    charge_id: charge.charge_id,
                    event_id: event.id.clone(),
                })
            }
            Err(e) => {
                error!(
                    charge_id = %charge.charge_id,
                    event_id = %event.id,
                    "Paid event could not be stored, manual reconciliation required: {e}"
                );
                self.emit(RelayEvent::StoreWriteFailed {
                    charge_id: charge.charge_id.clone(),
                    event_id: event.id.clone(),
                    message: e.to_string(),
                });
                Err(Error::StoreWrite {
                    charge_id: charge.charge_id,
                    event_id: event.id.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}
