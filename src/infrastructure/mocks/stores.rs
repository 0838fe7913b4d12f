//! Controllable store doubles.
//!
//! Each double wraps the in-memory store and can be switched to fail or to
//! stall, so tests can drive the failure modes and timeouts of the
//! governance layer.

use crate::application::ports::{CacheStore, CounterKey, CounterStore, StoreError};
use crate::domain::cache_entry::CacheEntry;
use crate::domain::window::{Window, WindowCounter};
use crate::infrastructure::cache_store::ShardedCacheStore;
use crate::infrastructure::counter_store::ShardedCounterStore;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Default)]
struct Faults {
    failing: AtomicBool,
    delay_ms: AtomicU64,
    calls: AtomicU64,
}

impl Faults {
    async fn enter(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let delay_ms = self.delay_ms.load(Ordering::SeqCst);
        if delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("injected failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Counter store that fails or stalls on demand.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FailingCounterStore {
    inner: ShardedCounterStore,
    faults: Arc<Faults>,
}

impl FailingCounterStore {
    /// Create a healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail (or succeed again).
    pub fn fail(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every call by `delay` before answering.
    pub fn stall(&self, delay: Duration) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.faults.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    /// Number of calls received, including failed ones.
    pub fn calls(&self) -> u64 {
        self.faults.calls.load(Ordering::SeqCst)
    }

    /// The wrapped in-memory store.
    pub fn inner(&self) -> &ShardedCounterStore {
        &self.inner
    }
}

#[async_trait]
impl CounterStore for FailingCounterStore {
    async fn increment(
        &self,
        key: &CounterKey,
        window: Window,
    ) -> Result<WindowCounter, StoreError> {
        self.faults.enter().await?;
        self.inner.increment(key, window).await
    }

    async fn decrement(&self, key: &CounterKey, window: Window) -> Result<(), StoreError> {
        self.faults.enter().await?;
        self.inner.decrement(key, window).await
    }

    async fn peek(&self, key: &CounterKey, window: Window) -> Result<WindowCounter, StoreError> {
        self.faults.enter().await?;
        self.inner.peek(key, window).await
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.faults.enter().await?;
        self.inner.reset().await
    }
}

/// Cache store that fails or stalls on demand.
///
/// Clones share state.
#[derive(Debug, Clone, Default)]
pub struct FailingCacheStore {
    inner: ShardedCacheStore,
    faults: Arc<Faults>,
}

impl FailingCacheStore {
    /// Create a healthy store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail (or succeed again).
    pub fn fail(&self, failing: bool) {
        self.faults.failing.store(failing, Ordering::SeqCst);
    }

    /// Delay every call by `delay` before answering.
    pub fn stall(&self, delay: Duration) {
        let delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.faults.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    /// Number of calls received, including failed ones.
    pub fn calls(&self) -> u64 {
        self.faults.calls.load(Ordering::SeqCst)
    }

    /// The wrapped in-memory store.
    pub fn inner(&self) -> &ShardedCacheStore {
        &self.inner
    }
}

#[async_trait]
impl CacheStore for FailingCacheStore {
    async fn get(&self, key: &str, now_ms: u64) -> Result<Option<CacheEntry>, StoreError> {
        self.faults.enter().await?;
        self.inner.get(key, now_ms).await
    }

    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), StoreError> {
        self.faults.enter().await?;
        self.inner.put(key, entry).await
    }

    async fn invalidate_tags(&self, tags: &[String]) -> Result<usize, StoreError> {
        self.faults.enter().await?;
        self.inner.invalidate_tags(tags).await
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.faults.enter().await?;
        self.inner.clear().await
    }
}
