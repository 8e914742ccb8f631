//! Invoice gateway to the external payment provider.
//!
//! [`InvoiceGateway`] is the seam the admission engine calls to create a
//! charge. [`ZebedeeGateway`] implements it against the ZEBEDEE charges
//! API: amounts are sent in millisatoshis and the response carries the
//! charge id and a BOLT11 payment request.
//!
//! Callbacks are never trusted on their own: the webhook handler asks the
//! gateway for the charge's current status before resolving it.

use super::ChargeStatus;
use crate::config::PaymentConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// A request for a new charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    /// Amount in satoshis.
    pub amount_sats: u64,
    /// Human-readable description shown in the invoice.
    pub description: String,
    /// Caller-side reference (the gated event id).
    pub reference: String,
    /// URL the provider calls when the charge changes status.
    pub callback_url: String,
}

/// A charge created by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    /// Provider-assigned charge id.
    pub charge_id: String,
    /// Payable reference (BOLT11 invoice).
    pub payment_request: String,
}

/// Creates charges with an external payment provider.
#[async_trait]
pub trait InvoiceGateway: Send + Sync {
    /// Create a charge.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Gateway`] on network or provider failure.
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge>;

    /// Current status of a charge, as the provider reports it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Gateway`] on network or provider failure, or if the
    /// provider reports a status this relay does not recognise.
    async fn charge_status(&self, charge_id: &str) -> Result<ChargeStatus>;
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ZbdChargeBody<'a> {
    expires_in: u64,
    amount: String,
    description: &'a str,
    internal_id: &'a str,
    callback_url: &'a str,
}

#[derive(Debug, Deserialize)]
struct ZbdResponse {
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Option<ZbdChargeData>,
}

#[derive(Debug, Deserialize)]
struct ZbdChargeData {
    id: String,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    invoice: Option<ZbdInvoice>,
}

#[derive(Debug, Deserialize)]
struct ZbdInvoice {
    request: String,
}

/// Invoice gateway backed by the ZEBEDEE API.
pub struct ZebedeeGateway {
    client: reqwest::Client,
    api_base: String,
    api_key: String,
    expires_in_secs: u64,
}

impl ZebedeeGateway {
    /// Create a gateway from payment configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(config: &PaymentConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("bazaar-relay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Gateway(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            api_base: config.api_base.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            expires_in_secs: config.charge_ttl_secs,
        })
    }

    fn charges_url(&self) -> String {
        format!("{}/v0/charges", self.api_base)
    }

    /// Read a provider response, mapping non-2xx and `success: false` to
    /// [`Error::Gateway`].
    async fn read_data(response: reqwest::Response, what: &str) -> Result<ZbdChargeData> {
        let status = response.status();
        let parsed: Option<ZbdResponse> = response.json().await.ok();

        if !status.is_success() {
            let message = parsed.and_then(|r| r.message).unwrap_or_default();
            warn!("Provider rejected {what}: {status} {message}");
            return Err(Error::Gateway(format!("provider returned {status}: {message}")));
        }

        match parsed {
            Some(ZbdResponse {
                success: true,
                data: Some(data),
                ..
            }) => Ok(data),
            Some(ZbdResponse { message, .. }) => Err(Error::Gateway(format!(
                "provider reported failure: {}",
                message.unwrap_or_else(|| "no message".to_string())
            ))),
            None => Err(Error::Gateway("unreadable provider response".to_string())),
        }
    }
}

#[async_trait]
impl InvoiceGateway for ZebedeeGateway {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<Charge> {
        let msats = request
            .amount_sats
            .checked_mul(1000)
            .ok_or_else(|| Error::Gateway(format!("amount {} sats overflows", request.amount_sats)))?;

        let body = ZbdChargeBody {
            expires_in: self.expires_in_secs,
            amount: msats.to_string(),
            description: &request.description,
            internal_id: &request.reference,
            callback_url: &request.callback_url,
        };

        debug!(
            "Creating charge of {} sats for {}",
            request.amount_sats, request.reference
        );

        let response = self
            .client
            .post(self.charges_url())
            .header("apikey", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("charge request failed: {e}")))?;

        let data = Self::read_data(response, &format!("charge for {}", request.reference)).await?;
        let invoice = data
            .invoice
            .ok_or_else(|| Error::Gateway(format!("charge {} has no invoice", data.id)))?;
        Ok(Charge {
            charge_id: data.id,
            payment_request: invoice.request,
        })
    }

    async fn charge_status(&self, charge_id: &str) -> Result<ChargeStatus> {
        let response = self
            .client
            .get(format!("{}/{charge_id}", self.charges_url()))
            .header("apikey", &self.api_key)
            .send()
            .await
            .map_err(|e| Error::Gateway(format!("charge status request failed: {e}")))?;

        let data = Self::read_data(response, &format!("status of charge {charge_id}")).await?;
        if data.id != charge_id {
            return Err(Error::Gateway(format!(
                "asked for charge {charge_id}, provider answered for {}",
                data.id
            )));
        }
        let raw = data.status.unwrap_or_default();
        debug!("Provider reports charge {charge_id} as {raw:?}");
        ChargeStatus::from_provider(&raw)
            .ok_or_else(|| Error::Gateway(format!("unrecognised status {raw:?} for {charge_id}")))
    }
}
