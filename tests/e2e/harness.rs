//! Test harness that boots a relay against a mock payment provider.

use bazaar_relay::http::{PaymentUpdateResponse, SubmitResponse};
use bazaar_relay::relay::ShutdownHandle;
use bazaar_relay::{Event, Relay, RelayBuilder, RelayConfig, RelayEvent, RelayEventsChannel};
use reqwest::StatusCode;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::info;
use wiremock::matchers::{method, path, path_regex};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Error type for test harness operations.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// Relay error
    #[error("Relay error: {0}")]
    Relay(#[from] bazaar_relay::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Timed out waiting for something
    #[error("Timed out: {0}")]
    Timeout(String),
}

/// Result type for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

/// How the mock payment provider behaves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderMode {
    /// Create a charge per request, named after the event id.
    Healthy,
    /// Answer every request with a 500.
    Down,
}

/// Answers charge requests with `charge-{n}-{internalId}`.
#[derive(Default)]
struct ChargeResponder(AtomicUsize);

impl Respond for ChargeResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let n = self.0.fetch_add(1, Ordering::SeqCst);
        let body: Value = serde_json::from_slice(&request.body).unwrap_or_default();
        let reference = body["internalId"].as_str().unwrap_or("unknown");
        let amount = body["amount"].as_str().unwrap_or("0");
        ResponseTemplate::new(201)
            .set_delay(Duration::from_millis(20))
            .set_body_json(json!({
                "success": true,
                "message": "Successfully created Charge.",
                "data": {
                    "id": format!("charge-{n}-{reference}"),
                    "status": "pending",
                    "amount": amount,
                    "invoice": { "request": format!("lnbc{amount}test") }
                }
            }))
    }
}

/// Charge statuses the provider reports, keyed by charge id.
type ProviderStatuses = Arc<Mutex<HashMap<String, String>>>;

/// Answers status lookups from the shared table; unknown charges are pending.
struct StatusResponder(ProviderStatuses);

impl Respond for StatusResponder {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let charge_id = request
            .url
            .path()
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string();
        let status = self
            .0
            .lock()
            .get(&charge_id)
            .cloned()
            .unwrap_or_else(|| "pending".to_string());
        ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Fetched Charge.",
            "data": { "id": charge_id, "status": status }
        }))
    }
}

/// A relay running on an ephemeral port.
pub struct TestHarness {
    relay: Arc<Relay>,
    addr: SocketAddr,
    client: reqwest::Client,
    shutdown: ShutdownHandle,
    task: JoinHandle<bazaar_relay::Result<()>>,
    events: RelayEventsChannel,
    provider: MockServer,
    statuses: ProviderStatuses,
    _root: tempfile::TempDir,
}

impl TestHarness {
    /// Start a relay charging `price_sats` per event with a healthy provider.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay fails to start.
    pub async fn start(price_sats: u64) -> Result<Self> {
        Self::start_with(price_sats, ProviderMode::Healthy, |_| {}).await
    }

    /// Start a relay with a provider mode and config tweaks.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay fails to start.
    pub async fn start_with(
        price_sats: u64,
        mode: ProviderMode,
        tweak: impl FnOnce(&mut RelayConfig),
    ) -> Result<Self> {
        let provider = MockServer::start().await;
        let response = Mock::given(method("POST")).and(path("/v0/charges"));
        match mode {
            ProviderMode::Healthy => response.respond_with(ChargeResponder::default()),
            ProviderMode::Down => response.respond_with(ResponseTemplate::new(500).set_body_json(
                json!({ "success": false, "message": "Internal Server Error" }),
            )),
        }
        .mount(&provider)
        .await;

        let statuses = ProviderStatuses::default();
        Mock::given(method("GET"))
            .and(path_regex(r"^/v0/charges/[^/]+$"))
            .respond_with(StatusResponder(Arc::clone(&statuses)))
            .mount(&provider)
            .await;

        let root = tempfile::tempdir()?;
        let mut config = RelayConfig {
            root_dir: root.path().to_path_buf(),
            listen: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..RelayConfig::default()
        };
        config.payment.price_sats = price_sats;
        config.payment.api_key = "test-key".to_string();
        config.payment.api_base = provider.uri();
        config.payment.request_timeout_secs = 5;
        tweak(&mut config);

        let mut running = RelayBuilder::new(config).build().await?;
        let addr = running.local_addr();
        let relay = running.relay();
        let shutdown = running.shutdown_handle();
        let events = running.subscribe_events();
        let task = tokio::spawn(async move { running.run().await });

        info!("Test relay listening on {addr}");

        Ok(Self {
            relay,
            addr,
            client: reqwest::Client::new(),
            shutdown,
            task,
            events,
            provider,
            statuses,
            _root: root,
        })
    }

    /// URL for `path` on the relay.
    #[must_use]
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    /// The relay under test.
    #[must_use]
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    /// The HTTP client.
    #[must_use]
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    /// POST an event to `/pay-for-event`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is not a
    /// submission response.
    pub async fn submit(&self, event: &Event) -> Result<(StatusCode, SubmitResponse)> {
        let response = self
            .client
            .post(self.url("/pay-for-event"))
            .json(event)
            .send()
            .await?;
        let status = response.status();
        Ok((status, response.json().await?))
    }

    /// POST a provider callback to `/payment-update/{reference}`.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the body is unreadable.
    pub async fn payment_update(
        &self,
        reference: &str,
        body: &Value,
    ) -> Result<(StatusCode, PaymentUpdateResponse)> {
        let response = self
            .client
            .post(self.url(&format!("/payment-update/{reference}")))
            .json(body)
            .send()
            .await?;
        let status = response.status();
        Ok((status, response.json().await?))
    }

    /// Make the provider report `status` for `charge_id`.
    pub fn set_provider_status(&self, charge_id: &str, status: &str) {
        self.statuses
            .lock()
            .insert(charge_id.to_string(), status.to_string());
    }

    /// Number of charge creation requests the provider received.
    pub async fn provider_calls(&self) -> usize {
        self.provider
            .received_requests()
            .await
            .map_or(0, |requests| {
                requests
                    .iter()
                    .filter(|r| r.method.as_str() == "POST")
                    .count()
            })
    }

    /// Wait for the first relay event matching `pred`.
    ///
    /// # Errors
    ///
    /// Returns an error if no matching event arrives within `timeout`.
    pub async fn wait_for_event(
        &mut self,
        timeout: Duration,
        pred: impl Fn(&RelayEvent) -> bool,
    ) -> Result<RelayEvent> {
        let events = &mut self.events;
        tokio::time::timeout(timeout, async {
            loop {
                match events.recv().await {
                    Ok(event) if pred(&event) => return Some(event),
                    Ok(_) | Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten()
        .ok_or_else(|| HarnessError::Timeout("relay event".to_string()))
    }

    /// Stop the relay and wait for it to exit.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay does not stop cleanly.
    pub async fn teardown(self) -> Result<()> {
        self.shutdown.shutdown();
        match tokio::time::timeout(Duration::from_secs(5), self.task).await {
            Ok(Ok(result)) => Ok(result?),
            Ok(Err(e)) => Err(HarnessError::Timeout(format!("relay task panicked: {e}"))),
            Err(_) => Err(HarnessError::Timeout("relay shutdown".to_string())),
        }
    }
}
