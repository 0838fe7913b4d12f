//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports: in-process
//! sharded maps by default, Redis for distributed counters.
//!
//! Store operations are `async` because they are the only suspension points
//! of the governance layer when a store is remote. Callers bound them with a
//! timeout.

use crate::domain::cache_entry::CacheEntry;
use crate::domain::window::{Window, WindowCounter};
use async_trait::async_trait;
use std::fmt::{self, Debug};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Port for obtaining current time.
///
/// Returns milliseconds since a fixed epoch. Window alignment is computed
/// against this value, so every process sharing a counter store must use the
/// same epoch (`SystemClock` uses the Unix epoch).
pub trait Clock: Send + Sync + Debug {
    /// Current time in milliseconds since the epoch.
    fn now_ms(&self) -> u64;
}

/// Error raised by a backing store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// Store could not be reached or rejected the operation
    #[error("backing store unavailable: {0}")]
    Unavailable(String),
    /// Store did not answer within the configured timeout
    #[error("backing store timed out after {0:?}")]
    Timeout(Duration),
    /// Store is bypassed because its circuit breaker is open
    #[error("backing store bypassed while its circuit is open")]
    CircuitOpen,
}

/// Identity of a counter: the policy it belongs to and the derived key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Policy name; counters of different policies never mix
    pub policy: Arc<str>,
    /// Derived rate-limit key
    pub key: String,
}

impl CounterKey {
    /// Create a counter key.
    pub fn new(policy: Arc<str>, key: impl Into<String>) -> Self {
        Self {
            policy,
            key: key.into(),
        }
    }
}

impl Debug for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.policy, self.key)
    }
}

impl fmt::Display for CounterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.policy, self.key)
    }
}

/// Port for per-key window counters.
///
/// Implementations must make `increment` and `decrement` atomic per key: two
/// concurrent increments of the same key observe distinct post-increment
/// counts.
#[async_trait]
pub trait CounterStore: Send + Sync + Debug {
    /// Count one request in `window` and return the updated counter.
    ///
    /// If the stored counter belongs to another window it is replaced by a
    /// fresh one before incrementing.
    async fn increment(&self, key: &CounterKey, window: Window)
        -> Result<WindowCounter, StoreError>;

    /// Give back one request previously counted in `window`.
    ///
    /// Does nothing if the stored counter belongs to another window or is
    /// already zero.
    async fn decrement(&self, key: &CounterKey, window: Window) -> Result<(), StoreError>;

    /// Read the counter for `window` without counting.
    ///
    /// Returns an empty counter if none exists for that window.
    async fn peek(&self, key: &CounterKey, window: Window) -> Result<WindowCounter, StoreError>;

    /// Drop every counter.
    async fn reset(&self) -> Result<(), StoreError>;
}

/// Port for tagged response storage.
#[async_trait]
pub trait CacheStore: Send + Sync + Debug {
    /// Fetch a fresh entry. Expired entries are treated as absent.
    async fn get(&self, key: &str, now_ms: u64) -> Result<Option<CacheEntry>, StoreError>;

    /// Insert or overwrite an entry and index it under its tags.
    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), StoreError>;

    /// Remove every entry carrying any of `tags`; returns how many were removed.
    async fn invalidate_tags(&self, tags: &[String]) -> Result<usize, StoreError>;

    /// Remove every entry.
    async fn clear(&self) -> Result<(), StoreError>;
}
