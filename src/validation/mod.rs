//! Kind-specific structural validation.
//!
//! Validators are registered per kind in a [`ValidatorRegistry`]. While
//! payment gating is off, the admission engine runs every validator
//! registered for an event's kind, in registration order, and stops at the
//! first failure.

mod auction;
mod bid;

pub use auction::{AuctionDescriptor, AuctionValidator};
pub use bid::{BidValidator, AUCTION_CLOSED, AUCTION_NOT_FOUND, BID_TOO_LOW, MALFORMED_BID};

use crate::nostr::{Event, KIND_AUCTION, KIND_BID};
use crate::store::EventStore;
use async_trait::async_trait;
use std::sync::Arc;

/// Result of running a validator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// The event is structurally valid.
    Pass,
    /// The event is invalid, with a human-readable reason.
    Fail(String),
}

impl Verdict {
    /// Build a failing verdict.
    #[must_use]
    pub fn fail(reason: impl Into<String>) -> Self {
        Self::Fail(reason.into())
    }

    /// Whether the verdict is a pass.
    #[must_use]
    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }
}

/// A structural check over one kind of event.
///
/// Validators never mutate state. They may read the event store.
#[async_trait]
pub trait EventValidator: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Check `event`.
    async fn validate(&self, event: &Event) -> Verdict;
}

struct Registration {
    kind: u32,
    validator: Arc<dyn EventValidator>,
}

/// Ordered list of validators keyed by event kind.
#[derive(Default)]
pub struct ValidatorRegistry {
    entries: Vec<Registration>,
}

impl ValidatorRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the auction and bid validators.
    #[must_use]
    pub fn with_defaults(store: Arc<dyn EventStore>) -> Self {
        let mut registry = Self::new();
        registry.register(KIND_AUCTION, Arc::new(AuctionValidator));
        registry.register(KIND_BID, Arc::new(BidValidator::new(store)));
        registry
    }

    /// Append a validator for `kind`.
    pub fn register(&mut self, kind: u32, validator: Arc<dyn EventValidator>) -> &mut Self {
        self.entries.push(Registration { kind, validator });
        self
    }

    /// Whether any validator is registered for `kind`.
    #[must_use]
    pub fn handles(&self, kind: u32) -> bool {
        self.entries.iter().any(|entry| entry.kind == kind)
    }

    /// Names of the validators registered for `kind`, in order.
    #[must_use]
    pub fn names_for(&self, kind: u32) -> Vec<&'static str> {
        self.entries
            .iter()
            .filter(|entry| entry.kind == kind)
            .map(|entry| entry.validator.name())
            .collect()
    }

    /// Run the validators registered for the event's kind.
    ///
    /// Returns `None` when no validator handles the kind.
    pub async fn validate(&self, event: &Event) -> Option<Verdict> {
        let mut handled = false;
        for entry in self.entries.iter().filter(|entry| entry.kind == event.kind) {
            handled = true;
            let verdict = entry.validator.validate(event).await;
            if !verdict.is_pass() {
                tracing::debug!(
                    "Validator {} rejected event {}: {:?}",
                    entry.validator.name(),
                    event.short_id(),
                    verdict
                );
                return Some(verdict);
            }
        }
        handled.then_some(Verdict::Pass)
    }
}
