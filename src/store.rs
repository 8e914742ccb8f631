//! Event store seam.
//!
//! The relay's storage engine is an external collaborator. [`EventStore`]
//! is the surface the admission workflow needs from it, and
//! [`MemoryEventStore`] is the in-process implementation used by the
//! shipped binary and the tests.

use crate::error::Result;
use crate::nostr::{Event, Filter};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, trace};

/// Storage backend for admitted events.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Persist an event.
    ///
    /// Returns `true` if the event was newly stored, `false` if it was
    /// already present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the write.
    async fn save(&self, event: &Event) -> Result<bool>;

    /// Return the events matching `filter`, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    async fn query(&self, filter: &Filter) -> Result<Vec<Event>>;

    /// Delete an event by id. Returns `true` if it existed.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend rejects the delete.
    async fn delete(&self, event_id: &str) -> Result<bool>;
}

/// Statistics about store operations.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Number of `save` calls that wrote a new event.
    pub writes: u64,
    /// Number of `save` calls for an event that was already stored.
    pub duplicates: u64,
    /// Number of queries served.
    pub queries: u64,
    /// Number of events deleted.
    pub deletes: u64,
}

/// In-memory event store.
#[derive(Default)]
pub struct MemoryEventStore {
    events: RwLock<HashMap<String, Event>>,
    stats: RwLock<StoreStats>,
}

impl MemoryEventStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Whether an event with `event_id` is stored.
    #[must_use]
    pub fn contains(&self, event_id: &str) -> bool {
        self.events.read().contains_key(event_id)
    }

    /// Current operation statistics.
    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.stats.read().clone()
    }
}

#[async_trait]
impl EventStore for MemoryEventStore {
    async fn save(&self, event: &Event) -> Result<bool> {
        let inserted = {
            let mut events = self.events.write();
            if events.contains_key(&event.id) {
                false
            } else {
                events.insert(event.id.clone(), event.clone());
                true
            }
        };

        let mut stats = self.stats.write();
        if inserted {
            stats.writes += 1;
            debug!("Stored event {} (kind {})", event.short_id(), event.kind);
        } else {
            stats.duplicates += 1;
            trace!("Event {} already stored", event.short_id());
        }
        Ok(inserted)
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Event>> {
        let mut matched: Vec<Event> = self
            .events
            .read()
            .values()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();

        matched.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }

        self.stats.write().queries += 1;
        Ok(matched)
    }

    async fn delete(&self, event_id: &str) -> Result<bool> {
        let removed = self.events.write().remove(event_id).is_some();
        if removed {
            self.stats.write().deletes += 1;
        }
        Ok(removed)
    }
}
