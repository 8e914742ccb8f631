//! LRU cache of resolved charges.
//!
//! Once a charge leaves the ledger its id is remembered here with its
//! terminal status, so a redelivered webhook can be told apart from a
//! reference this relay never issued.

use super::ChargeStatus;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// Default cache capacity.
const DEFAULT_CACHE_CAPACITY: usize = 10_000;

/// LRU cache mapping resolved charge ids to their terminal status.
#[derive(Clone)]
pub struct ResolvedCache {
    inner: Arc<Mutex<LruCache<String, ChargeStatus>>>,
    stats: Arc<Mutex<CacheStats>>,
}

/// Cache statistics for monitoring.
#[derive(Debug, Default, Clone)]
pub struct CacheStats {
    /// Lookups that found a resolved charge (duplicate deliveries).
    pub hits: u64,
    /// Lookups that found nothing.
    pub misses: u64,
    /// Number of charges recorded.
    pub additions: u64,
}

impl CacheStats {
    /// Calculate hit rate as a percentage.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

impl ResolvedCache {
    /// Create a new cache with default capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// Create a new cache with the specified capacity (at least one entry).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let cap = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Arc::new(Mutex::new(LruCache::new(cap))),
            stats: Arc::new(Mutex::new(CacheStats::default())),
        }
    }

    /// Terminal status of a resolved charge, if remembered.
    pub fn get(&self, charge_id: &str) -> Option<ChargeStatus> {
        let found = self.inner.lock().get(charge_id).copied();

        let mut stats = self.stats.lock();
        if found.is_some() {
            stats.hits += 1;
        } else {
            stats.misses += 1;
        }

        found
    }

    /// Remember that `charge_id` resolved to `status`.
    pub fn insert(&self, charge_id: String, status: ChargeStatus) {
        self.inner.lock().put(charge_id, status);
        self.stats.lock().additions += 1;
    }

    /// Get current cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        self.stats.lock().clone()
    }

    /// Get the current number of entries in the cache.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Check if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl Default for ResolvedCache {
    fn default() -> Self {
        Self::new()
    }
}
