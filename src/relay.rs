//! Relay wiring and lifecycle.
//!
//! [`RelayBuilder`] assembles the admission engine, ledger, webhook handler
//! and store; [`RunningRelay`] serves them over HTTP and runs the expiry
//! sweep until shutdown.

use crate::admission::{AdmissionConfig, AdmissionEngine, Outcome, Rejection};
use crate::config::RelayConfig;
use crate::error::{Error, Result};
use crate::event::{create_event_channel, RelayEvent, RelayEventsChannel, RelayEventsSender};
use crate::http;
use crate::nostr::Event;
use crate::payment::{
    InvoiceGateway, PaymentWebhookHandler, PendingCharge, PendingLedger, WebhookOutcome,
    ZebedeeGateway,
};
use crate::store::{EventStore, MemoryEventStore};
use crate::validation::ValidatorRegistry;
use chrono::Utc;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// NIP-11 relay information document.
#[derive(Debug, Clone, Serialize)]
pub struct RelayInfo {
    /// Relay name.
    pub name: String,
    /// Relay description.
    pub description: String,
    /// Supported NIPs.
    pub supported_nips: Vec<u32>,
    /// Software identifier.
    pub software: String,
    /// Software version.
    pub version: String,
    /// Server limitations.
    pub limitation: RelayLimitation,
    /// Publication fees, present when gating is on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fees: Option<RelayFees>,
}

/// NIP-11 `limitation` object.
#[derive(Debug, Clone, Serialize)]
pub struct RelayLimitation {
    /// Whether events must be paid for.
    pub payment_required: bool,
}

/// NIP-11 `fees` object.
#[derive(Debug, Clone, Serialize)]
pub struct RelayFees {
    /// Per-event publication fees.
    pub publication: Vec<RelayFee>,
}

/// A single NIP-11 fee.
#[derive(Debug, Clone, Serialize)]
pub struct RelayFee {
    /// Amount in `unit`.
    pub amount: u64,
    /// Fee unit.
    pub unit: String,
}

/// The assembled relay: admission, payment resolution and storage.
pub struct Relay {
    config: RelayConfig,
    engine: AdmissionEngine,
    ledger: PendingLedger,
    webhook: PaymentWebhookHandler,
    store: Arc<dyn EventStore>,
    events_tx: RelayEventsSender,
}

impl Relay {
    /// Wire a relay from its parts.
    #[must_use]
    pub fn new(
        config: RelayConfig,
        store: Arc<dyn EventStore>,
        ledger: PendingLedger,
        gateway: Arc<dyn InvoiceGateway>,
        events_tx: RelayEventsSender,
    ) -> Self {
        let engine = AdmissionEngine::new(
            AdmissionConfig::from(&config),
            ValidatorRegistry::with_defaults(Arc::clone(&store)),
            ledger.clone(),
            Arc::clone(&gateway),
            Arc::clone(&store),
        )
        .with_events(events_tx.clone());
        let webhook = PaymentWebhookHandler::new(ledger.clone(), Arc::clone(&store), gateway)
            .with_events(events_tx.clone());

        Self {
            config,
            engine,
            ledger,
            webhook,
            store,
            events_tx,
        }
    }

    /// Submit an event for admission.
    ///
    /// Accepted events are written to the store before returning.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Store`] if an accepted event cannot be written.
    pub async fn submit(&self, event: Event) -> Result<Outcome> {
        let outcome = if event.verify_id() {
            self.engine.decide(&event).await
        } else {
            Outcome::Reject(Rejection::invalid("event id does not match content"))
        };

        match &outcome {
            Outcome::Accept => {
                let inserted = self
                    .store
                    .save(&event)
                    .await
                    .map_err(|e| Error::Store(format!("failed to store {}: {e}", event.id)))?;
                if inserted {
                    info!("Accepted event {} (kind {})", event.short_id(), event.kind);
                } else {
                    debug!("Event {} already stored", event.short_id());
                }
                let _ = self.events_tx.send(RelayEvent::EventAccepted {
                    event_id: event.id.clone(),
                });
            }
            Outcome::Reject(rejection) => {
                debug!("Rejected event {}: {rejection}", event.short_id());
                let _ = self.events_tx.send(RelayEvent::EventRejected {
                    event_id: event.id.clone(),
                    reason: rejection.reason.clone(),
                });
            }
            Outcome::Pending(_) => {}
        }

        Ok(outcome)
    }

    /// Apply a provider payment-status callback.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StoreWrite`] if a paid event could not be stored.
    pub async fn payment_update(
        &self,
        reference: &str,
        body_charge_id: Option<&str>,
        status: &str,
    ) -> Result<WebhookOutcome> {
        self.webhook
            .handle_delivery(reference, body_charge_id, status)
            .await
    }

    /// Expire pending charges older than the configured TTL.
    pub fn expire_stale(&self) -> Vec<PendingCharge> {
        let ttl = Duration::from_secs(self.config.payment.charge_ttl_secs);
        let expired = self.ledger.expire_older_than(ttl, Utc::now());
        for charge in &expired {
            info!(
                "Charge {} expired; discarded event {}",
                charge.charge_id, charge.event_id
            );
            let _ = self.events_tx.send(RelayEvent::ChargeDiscarded {
                charge_id: charge.charge_id.clone(),
                event_id: charge.event_id.clone(),
                status: charge.status.to_string(),
            });
        }
        expired
    }

    /// NIP-11 information document.
    #[must_use]
    pub fn info(&self) -> RelayInfo {
        let price_sats = self.config.payment.price_sats;
        RelayInfo {
            name: self.config.name.clone(),
            description: self.config.description.clone(),
            supported_nips: vec![1, 11],
            software: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            limitation: RelayLimitation {
                payment_required: price_sats > 0,
            },
            fees: (price_sats > 0).then(|| RelayFees {
                publication: vec![RelayFee {
                    amount: price_sats.saturating_mul(1000),
                    unit: "msats".to_string(),
                }],
            }),
        }
    }

    /// Relay configuration.
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The pending-payment ledger.
    #[must_use]
    pub fn ledger(&self) -> &PendingLedger {
        &self.ledger
    }

    /// The event store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }
}

/// Builder for constructing a relay.
pub struct RelayBuilder {
    config: RelayConfig,
    gateway: Option<Arc<dyn InvoiceGateway>>,
    store: Option<Arc<dyn EventStore>>,
}

impl RelayBuilder {
    /// Create a new relay builder with the given configuration.
    #[must_use]
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            gateway: None,
            store: None,
        }
    }

    /// Use `gateway` instead of the ZEBEDEE client.
    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn InvoiceGateway>) -> Self {
        self.gateway = Some(gateway);
        self
    }

    /// Use `store` instead of an in-memory store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn EventStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Build the relay and bind its listener.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the ledger
    /// snapshot cannot be loaded, or the listen address cannot be bound.
    pub async fn build(self) -> Result<RunningRelay> {
        info!(
            "Building bazaar-relay (listen={}, price_sats={}, unknown_kinds={:?})",
            self.config.listen, self.config.payment.price_sats, self.config.unknown_kinds
        );
        self.config.validate()?;

        std::fs::create_dir_all(&self.config.root_dir)?;

        let ledger = PendingLedger::open(&self.config.ledger)?;
        let gateway: Arc<dyn InvoiceGateway> = match self.gateway {
            Some(gateway) => gateway,
            None => Arc::new(ZebedeeGateway::new(&self.config.payment)?),
        };
        let store: Arc<dyn EventStore> = match self.store {
            Some(store) => store,
            None => Arc::new(MemoryEventStore::new()),
        };

        let listener = TcpListener::bind(self.config.listen).await?;
        let local_addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = create_event_channel();

        let relay = Arc::new(Relay::new(
            self.config,
            store,
            ledger,
            gateway,
            events_tx.clone(),
        ));

        Ok(RunningRelay {
            relay,
            listener: Some(listener),
            local_addr,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            events_tx,
            events_rx: Some(events_rx),
        })
    }
}

/// Handle for stopping a running relay from another task.
#[derive(Clone)]
pub struct ShutdownHandle(Arc<watch::Sender<bool>>);

impl ShutdownHandle {
    /// Request shutdown.
    pub fn shutdown(&self) {
        let _ = self.0.send(true);
    }
}

/// A relay bound to its listen address.
pub struct RunningRelay {
    relay: Arc<Relay>,
    listener: Option<TcpListener>,
    local_addr: SocketAddr,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    events_tx: RelayEventsSender,
    events_rx: Option<RelayEventsChannel>,
}

impl RunningRelay {
    /// Address the HTTP server is bound to.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Shared handle to the relay.
    #[must_use]
    pub fn relay(&self) -> Arc<Relay> {
        Arc::clone(&self.relay)
    }

    /// Get a receiver for relay events.
    ///
    /// Note: Can only be called once. Subsequent calls return None.
    pub fn events(&mut self) -> Option<RelayEventsChannel> {
        self.events_rx.take()
    }

    /// Subscribe to relay events.
    #[must_use]
    pub fn subscribe_events(&self) -> RelayEventsChannel {
        self.events_tx.subscribe()
    }

    /// Handle that stops the relay from another task.
    #[must_use]
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle(Arc::clone(&self.shutdown_tx))
    }

    /// Serve until shutdown is requested or Ctrl-C is received.
    ///
    /// # Errors
    ///
    /// Returns an error if the relay was already run or the server fails.
    pub async fn run(&mut self) -> Result<()> {
        let listener = self
            .listener
            .take()
            .ok_or_else(|| Error::Http("relay is already running".to_string()))?;

        info!("Starting bazaar-relay on {}", self.local_addr);
        let _ = self.events_tx.send(RelayEvent::Started);

        let sweeper = spawn_sweeper(Arc::clone(&self.relay), self.shutdown_rx.clone());

        let mut shutdown_rx = self.shutdown_rx.clone();
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let signal = async move {
            tokio::select! {
                () = wait_for_shutdown(&mut shutdown_rx) => {
                    info!("Shutdown signal received");
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Ctrl-C received, initiating shutdown");
                    let _ = shutdown_tx.send(true);
                }
            }
        };

        let served = axum::serve(listener, http::router(Arc::clone(&self.relay)))
            .with_graceful_shutdown(signal)
            .await;

        // Stop the sweep even if the server failed.
        self.shutdown();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                warn!("Expiry sweep task ended abnormally: {e}");
            }
        }
        if let Err(e) = self.relay.ledger().flush().await {
            warn!("Final ledger snapshot failed: {e}");
        }

        let _ = self.events_tx.send(RelayEvent::ShuttingDown);
        served.map_err(|e| {
            let _ = self.events_tx.send(RelayEvent::Error {
                message: format!("HTTP server failed: {e}"),
            });
            Error::Http(format!("HTTP server failed: {e}"))
        })?;
        info!("Relay shutdown complete");
        Ok(())
    }

    /// Request the relay to shut down.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow_and_update() {
            return;
        }
        if shutdown_rx.changed().await.is_err() {
            return;
        }
    }
}

fn spawn_sweeper(
    relay: Arc<Relay>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Option<JoinHandle<()>> {
    let interval_secs = relay.config().payment.sweep_interval_secs;
    if interval_secs == 0 {
        info!("Expiry sweep disabled");
        return None;
    }
    let period = Duration::from_secs(interval_secs);
    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = wait_for_shutdown(&mut shutdown_rx) => break,
                _ = ticker.tick() => {
                    let expired = relay.expire_stale();
                    if !expired.is_empty() {
                        debug!("Expiry sweep discarded {} charges", expired.len());
                    }
                }
            }
        }
    }))
}
