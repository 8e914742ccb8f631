//! Pending-payment ledger.
//!
//! Owns every held event between charge creation and charge resolution.
//! All check-and-set operations (reserving an event id, committing a new
//! charge, resolving a charge, expiring stale charges) happen inside a
//! single critical section over [`LedgerState`]; callers never hold that
//! lock across gateway calls or store writes.
//!
//! With a snapshot path configured, each mutation rewrites a MessagePack
//! snapshot of the held events (temp file + rename), and
//! [`PendingLedger::open`] reloads it on startup. Inside a tokio runtime
//! the write runs on the blocking pool; [`PendingLedger::flush`] waits for
//! the current state to reach disk.

use super::cache::{CacheStats, ResolvedCache};
use super::{ChargeStatus, HeldEvent, PendingCharge};
use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::nostr::Event;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Per-event slot in the ledger.
enum Slot {
    /// A submitter is creating the charge; waiters are released when the
    /// claim is committed or dropped.
    Reserved(watch::Receiver<()>),
    /// A pending charge exists.
    Active(String),
}

#[derive(Default)]
struct LedgerState {
    /// Pending charges by charge id.
    charges: HashMap<String, HeldEvent>,
    /// Slots by event id.
    by_event: HashMap<String, Slot>,
}

impl LedgerState {
    fn insert(&mut self, held: HeldEvent) {
        self.by_event.insert(
            held.event.id.clone(),
            Slot::Active(held.charge.charge_id.clone()),
        );
        self.charges.insert(held.charge.charge_id.clone(), held);
    }

    fn remove(&mut self, charge_id: &str) -> Option<HeldEvent> {
        let held = self.charges.remove(charge_id)?;
        if matches!(
            self.by_event.get(&held.charge.event_id),
            Some(Slot::Active(id)) if id == charge_id
        ) {
            self.by_event.remove(&held.charge.event_id);
        }
        Some(held)
    }
}

struct LedgerInner {
    state: Mutex<LedgerState>,
    resolved: ResolvedCache,
    snapshot: Option<PathBuf>,
    /// Serialises snapshot writes so the newest state always lands last.
    writer: Mutex<()>,
    /// A background snapshot write is queued and has not started yet.
    write_queued: AtomicBool,
}

/// Result of [`PendingLedger::reserve`].
pub enum Reservation {
    /// A pending charge already exists for the event.
    Existing(PendingCharge),
    /// The caller owns the slot and must create the charge.
    Claimed(Claim),
    /// Another caller is creating the charge right now.
    Busy(Waiter),
}

/// Result of [`PendingLedger::resolve`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// The charge moved to a terminal status.
    Resolved {
        /// The charge, carrying its terminal status.
        charge: PendingCharge,
        /// The held event, returned only for `paid`.
        event: Option<Event>,
    },
    /// The charge had already been resolved with this status.
    AlreadyResolved(ChargeStatus),
    /// The ledger never held this charge, or has forgotten it.
    Unknown,
}

/// Exclusive right to create the charge for one event id.
///
/// Dropping a claim without committing frees the slot.
pub struct Claim {
    ledger: PendingLedger,
    event_id: String,
    committed: bool,
    _release: watch::Sender<()>,
}

impl Claim {
    /// Event id this claim covers.
    #[must_use]
    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    /// Record the created charge and hold `event` until it resolves.
    pub fn commit(mut self, charge: PendingCharge, event: Event) -> PendingCharge {
        {
            let mut state = self.ledger.inner.state.lock();
            state.insert(HeldEvent {
                charge: charge.clone(),
                event,
            });
        }
        self.committed = true;
        debug!(
            "Charge {} pending for event {}",
            charge.charge_id, self.event_id
        );
        self.ledger.persist_logged();
        charge
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let mut state = self.ledger.inner.state.lock();
        if matches!(state.by_event.get(&self.event_id), Some(Slot::Reserved(_))) {
            state.by_event.remove(&self.event_id);
        }
    }
}

/// Handle for waiting on another submitter's claim.
pub struct Waiter {
    release: watch::Receiver<()>,
}

impl Waiter {
    /// Wait until the claim is committed or abandoned.
    pub async fn wait(mut self) {
        // The sender never sends; it is dropped with the claim.
        while self.release.changed().await.is_ok() {}
    }
}

/// Shared pending-payment ledger.
#[derive(Clone)]
pub struct PendingLedger {
    inner: Arc<LedgerInner>,
}

impl PendingLedger {
    /// In-memory ledger remembering `resolved_capacity` resolved charges.
    #[must_use]
    pub fn in_memory(resolved_capacity: usize) -> Self {
        Self::build(resolved_capacity, None, LedgerState::default())
    }

    /// Open a ledger from configuration, reloading its snapshot if present.
    ///
    /// # Errors
    ///
    /// Returns an error if an existing snapshot cannot be read or decoded.
    pub fn open(config: &LedgerConfig) -> Result<Self> {
        let Some(path) = config.path.clone() else {
            return Ok(Self::in_memory(config.resolved_capacity));
        };

        let mut state = LedgerState::default();
        if path.exists() {
            let bytes = std::fs::read(&path)?;
            let held: Vec<HeldEvent> = rmp_serde::from_slice(&bytes).map_err(|e| {
                Error::Ledger(format!("Failed to decode snapshot {}: {e}", path.display()))
            })?;
            for entry in held {
                if entry.charge.status == ChargeStatus::Pending {
                    state.insert(entry);
                }
            }
            info!(
                "Restored {} pending charges from {}",
                state.charges.len(),
                path.display()
            );
        }

        Ok(Self::build(config.resolved_capacity, Some(path), state))
    }

    fn build(resolved_capacity: usize, snapshot: Option<PathBuf>, state: LedgerState) -> Self {
        Self {
            inner: Arc::new(LedgerInner {
                state: Mutex::new(state),
                resolved: ResolvedCache::with_capacity(resolved_capacity),
                snapshot,
                writer: Mutex::new(()),
                write_queued: AtomicBool::new(false),
            }),
        }
    }

    /// Take the charge-creation slot for `event_id`.
    pub fn reserve(&self, event_id: &str) -> Reservation {
        let mut state = self.inner.state.lock();
        match state.by_event.get(event_id) {
            Some(Slot::Active(charge_id)) => {
                if let Some(held) = state.charges.get(charge_id) {
                    return Reservation::Existing(held.charge.clone());
                }
                // Index without a charge; reclaim the slot below.
                warn!("Dangling ledger index for event {event_id}");
            }
            Some(Slot::Reserved(release)) => {
                return Reservation::Busy(Waiter {
                    release: release.clone(),
                });
            }
            None => {}
        }

        let (release_tx, release_rx) = watch::channel(());
        state
            .by_event
            .insert(event_id.to_string(), Slot::Reserved(release_rx));
        Reservation::Claimed(Claim {
            ledger: self.clone(),
            event_id: event_id.to_string(),
            committed: false,
            _release: release_tx,
        })
    }

    /// Hold `event` under `charge` directly.
    ///
    /// # Errors
    ///
    /// Returns an error if the charge is not pending, does not match the
    /// event, or another charge is already pending for the event.
    pub fn put(&self, charge: PendingCharge, event: Event) -> Result<()> {
        if charge.status != ChargeStatus::Pending {
            return Err(Error::Ledger(format!(
                "charge {} is {}, not pending",
                charge.charge_id, charge.status
            )));
        }
        if charge.event_id != event.id {
            return Err(Error::Ledger(format!(
                "charge {} is for event {}, not {}",
                charge.charge_id, charge.event_id, event.id
            )));
        }
        {
            let mut state = self.inner.state.lock();
            if state.by_event.contains_key(&event.id) {
                return Err(Error::Ledger(format!(
                    "event {} already has a charge in progress",
                    event.id
                )));
            }
            state.insert(HeldEvent { charge, event });
        }
        self.persist_logged();
        Ok(())
    }

    /// Pending charge by charge id.
    #[must_use]
    pub fn get(&self, charge_id: &str) -> Option<PendingCharge> {
        self.inner
            .state
            .lock()
            .charges
            .get(charge_id)
            .map(|held| held.charge.clone())
    }

    /// Pending charge by event id.
    #[must_use]
    pub fn get_by_event(&self, event_id: &str) -> Option<PendingCharge> {
        let state = self.inner.state.lock();
        match state.by_event.get(event_id) {
            Some(Slot::Active(charge_id)) => {
                state.charges.get(charge_id).map(|held| held.charge.clone())
            }
            _ => None,
        }
    }

    /// Pending charge by charge id, falling back to event id.
    #[must_use]
    pub fn find(&self, reference: &str) -> Option<PendingCharge> {
        self.get(reference).or_else(|| self.get_by_event(reference))
    }

    /// Terminal status of a recently resolved charge.
    #[must_use]
    pub fn resolved_status(&self, charge_id: &str) -> Option<ChargeStatus> {
        self.inner.resolved.get(charge_id)
    }

    /// Move a pending charge to a terminal status, exactly once.
    ///
    /// A `Pending` outcome is not a transition and leaves the charge alone.
    /// The held event is returned only when `outcome` is `Paid`.
    pub fn resolve(&self, charge_id: &str, outcome: ChargeStatus) -> Resolution {
        if !outcome.is_terminal() {
            return match self.get(charge_id) {
                Some(_) => Resolution::AlreadyResolved(ChargeStatus::Pending),
                None => self.unknown_or_resolved(charge_id),
            };
        }

        let removed = self.inner.state.lock().remove(charge_id);
        let Some(HeldEvent { mut charge, event }) = removed else {
            return self.unknown_or_resolved(charge_id);
        };

        charge.status = outcome;
        self.inner.resolved.insert(charge.charge_id.clone(), outcome);
        self.persist_logged();

        debug!(
            "Charge {} for event {} resolved as {}",
            charge.charge_id, charge.event_id, outcome
        );
        let event = (outcome == ChargeStatus::Paid).then_some(event);
        Resolution::Resolved { charge, event }
    }

    fn unknown_or_resolved(&self, charge_id: &str) -> Resolution {
        self.inner
            .resolved
            .get(charge_id)
            .map_or(Resolution::Unknown, Resolution::AlreadyResolved)
    }

    /// Expire every pending charge created more than `ttl` before `now`.
    ///
    /// Returns the expired charges; their events are discarded.
    pub fn expire_older_than(&self, ttl: Duration, now: DateTime<Utc>) -> Vec<PendingCharge> {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let cutoff = now.checked_sub_signed(ttl).unwrap_or(DateTime::<Utc>::MIN_UTC);

        let expired: Vec<PendingCharge> = {
            let mut state = self.inner.state.lock();
            let stale: Vec<String> = state
                .charges
                .values()
                .filter(|held| held.charge.created_at <= cutoff)
                .map(|held| held.charge.charge_id.clone())
                .collect();
            stale
                .iter()
                .filter_map(|id| state.remove(id))
                .map(|held| PendingCharge {
                    status: ChargeStatus::Expired,
                    ..held.charge
                })
                .collect()
        };

        if !expired.is_empty() {
            for charge in &expired {
                self.inner
                    .resolved
                    .insert(charge.charge_id.clone(), ChargeStatus::Expired);
            }
            self.persist_logged();
        }
        expired
    }

    /// Number of pending charges.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.state.lock().charges.len()
    }

    /// Whether no charge is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().charges.is_empty()
    }

    /// Statistics of the resolved-charge cache.
    #[must_use]
    pub fn resolved_stats(&self) -> CacheStats {
        self.inner.resolved.stats()
    }

    /// Snapshot path, if the ledger is durable.
    #[must_use]
    pub fn snapshot_path(&self) -> Option<&Path> {
        self.inner.snapshot.as_deref()
    }

    fn persist_logged(&self) {
        if self.inner.snapshot.is_none() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            self.persist_or_warn();
            return;
        };

        // A queued write reads the state when it runs, so it also covers
        // every mutation made before then.
        if self.inner.write_queued.swap(true, Ordering::AcqRel) {
            return;
        }
        let ledger = self.clone();
        runtime.spawn_blocking(move || {
            ledger.inner.write_queued.store(false, Ordering::Release);
            ledger.persist_or_warn();
        });
    }

    fn persist_or_warn(&self) {
        if let Err(e) = self.persist() {
            warn!("Failed to persist ledger snapshot: {e}");
        }
    }

    /// Write the snapshot on the blocking pool and wait for it.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be written.
    pub async fn flush(&self) -> Result<()> {
        let ledger = self.clone();
        tokio::task::spawn_blocking(move || ledger.persist())
            .await
            .map_err(|e| Error::Ledger(format!("Snapshot writer failed: {e}")))?
    }

    /// Write the snapshot now.
    ///
    /// # Errors
    ///
    /// Returns an error if the snapshot cannot be encoded or written.
    pub fn persist(&self) -> Result<()> {
        let Some(path) = self.inner.snapshot.as_deref() else {
            return Ok(());
        };

        let _writer = self.inner.writer.lock();
        let bytes = {
            let state = self.inner.state.lock();
            let held: Vec<&HeldEvent> = state.charges.values().collect();
            rmp_serde::to_vec_named(&held)
                .map_err(|e| Error::Serialization(format!("ledger snapshot: {e}")))?
        };

        let dir = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(path)
            .map_err(|e| Error::Ledger(format!("Failed to replace snapshot: {e}")))?;
        Ok(())
    }
}
