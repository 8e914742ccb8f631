//! HTTP surface.
//!
//! - `GET /`: NIP-11 relay information document
//! - `GET /healthz`: liveness and ledger size
//! - `POST /pay-for-event`: submit an event for admission
//! - `POST /payment-update/{reference}`: payment provider callback

use crate::admission::{Outcome, RejectKind};
use crate::error::Error;
use crate::nostr::Event;
use crate::payment::WebhookOutcome;
use crate::relay::Relay;
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};

/// Build the relay's router.
pub fn router(relay: Arc<Relay>) -> Router {
    Router::new()
        .route("/", get(relay_info))
        .route("/healthz", get(healthz))
        .route("/pay-for-event", post(pay_for_event))
        .route("/payment-update/{reference}", post(payment_update))
        .layer(TraceLayer::new_for_http())
        .with_state(relay)
}

// =============================================================================
// Request/Response Types
// =============================================================================

/// Body of `POST /pay-for-event` responses.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SubmitResponse {
    /// The event was stored.
    Accepted,
    /// The event is held until the charge is paid.
    PaymentRequired {
        /// Provider charge id.
        charge_id: String,
        /// BOLT11 invoice to pay.
        payment_request: String,
        /// Amount in satoshis.
        amount_sats: u64,
    },
    /// The event was refused.
    Rejected {
        /// Reason.
        reason: String,
        /// NIP-01 style `prefix: reason` message.
        message: String,
    },
    /// The relay failed while handling the event.
    Error {
        /// Reason.
        reason: String,
    },
}

impl SubmitResponse {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Accepted => StatusCode::CREATED,
            Self::PaymentRequired { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Rejected { .. } => StatusCode::BAD_REQUEST,
            Self::Error { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Provider callback body. Only `status` is required.
#[derive(Debug, Deserialize)]
pub struct PaymentUpdate {
    /// Provider status string.
    pub status: String,
    /// Provider charge id, if sent.
    #[serde(default)]
    pub id: Option<String>,
}

/// Body of `POST /payment-update/{reference}` responses.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct PaymentUpdateResponse {
    /// What the delivery did.
    pub outcome: String,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    pending_charges: usize,
}

// =============================================================================
// Handlers
// =============================================================================

async fn relay_info(State(relay): State<Arc<Relay>>) -> impl IntoResponse {
    Json(relay.info())
}

async fn healthz(State(relay): State<Arc<Relay>>) -> impl IntoResponse {
    Json(Health {
        status: "ok",
        pending_charges: relay.ledger().len(),
    })
}

async fn pay_for_event(State(relay): State<Arc<Relay>>, body: Bytes) -> Response {
    let event: Event = match serde_json::from_slice(&body) {
        Ok(event) => event,
        Err(e) => {
            let reason = format!("malformed event: {e}");
            return respond(SubmitResponse::Rejected {
                message: format!("invalid: {reason}"),
                reason,
            });
        }
    };

    let event_id = event.id.clone();
    let response = match relay.submit(event).await {
        Ok(Outcome::Accept) => SubmitResponse::Accepted,
        Ok(Outcome::Pending(charge)) => SubmitResponse::PaymentRequired {
            charge_id: charge.charge_id,
            payment_request: charge.payment_request,
            amount_sats: charge.amount_sats,
        },
        Ok(Outcome::Reject(rejection)) => {
            let unavailable = rejection.kind == RejectKind::PaymentBackendUnavailable;
            let body = SubmitResponse::Rejected {
                message: rejection.to_string(),
                reason: rejection.reason,
            };
            if unavailable {
                return (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response();
            }
            body
        }
        Err(e) => {
            error!("Submission of event {event_id} failed: {e}");
            SubmitResponse::Error {
                reason: e.to_string(),
            }
        }
    };
    respond(response)
}

fn respond(body: SubmitResponse) -> Response {
    (body.status_code(), Json(body)).into_response()
}

async fn payment_update(
    State(relay): State<Arc<Relay>>,
    Path(reference): Path<String>,
    body: Bytes,
) -> Response {
    let update: PaymentUpdate = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            warn!("Unparseable payment update for {reference}: {e}");
            return (
                StatusCode::BAD_REQUEST,
                Json(PaymentUpdateResponse {
                    outcome: "malformed".to_string(),
                }),
            )
                .into_response();
        }
    };

    let (code, outcome) = match relay
        .payment_update(&reference, update.id.as_deref(), &update.status)
        .await
    {
        Ok(outcome) => (StatusCode::OK, outcome.as_str()),
        // Already logged and broadcast; a provider retry would be a no-op.
        Err(Error::StoreWrite { .. }) => (StatusCode::OK, "store-write-failed"),
        // Charge left pending; a non-2xx asks the provider to retry.
        Err(Error::Gateway(_)) => (StatusCode::SERVICE_UNAVAILABLE, "unverified"),
        Err(e) => {
            error!("Payment update for {reference} failed: {e}");
            (StatusCode::OK, WebhookOutcome::Ignored.as_str())
        }
    };

    (
        code,
        Json(PaymentUpdateResponse {
            outcome: outcome.to_string(),
        }),
    )
        .into_response()
}
