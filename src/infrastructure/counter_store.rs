//! In-process counter store.
//!
//! Provides concurrent, sharded storage for window counters.

use crate::application::ports::{CounterKey, CounterStore, StoreError};
use crate::domain::window::{Window, WindowCounter};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;

/// Thread-safe sharded counter store backed by DashMap.
///
/// DashMap locks one shard per write, so the read-compare-increment of a
/// counter happens under that shard's lock and concurrent increments of the
/// same key are serialized. Clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct ShardedCounterStore {
    counters: Arc<DashMap<CounterKey, WindowCounter, ahash::RandomState>>,
}

impl ShardedCounterStore {
    /// Create a new, empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove counters whose window ended at or before `now_ms`.
    ///
    /// Returns how many were removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let before = self.counters.len();
        self.counters
            .retain(|_, counter| !counter.is_expired(now_ms));
        before.saturating_sub(self.counters.len())
    }

    /// Get the number of counters held.
    pub fn len(&self) -> usize {
        self.counters.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }

    fn increment_now(&self, key: &CounterKey, window: Window) -> WindowCounter {
        let mut counter = self
            .counters
            .entry(key.clone())
            .or_insert_with(|| WindowCounter::new(window));

        // A counter from an earlier window is logically gone.
        if counter.window.start_ms < window.start_ms {
            *counter = WindowCounter::new(window);
        }
        counter.count = counter.count.saturating_add(1);
        *counter
    }

    fn decrement_now(&self, key: &CounterKey, window: Window) {
        if let Some(mut counter) = self.counters.get_mut(key) {
            if counter.window == window {
                counter.count = counter.count.saturating_sub(1);
            }
        }
    }

    fn peek_now(&self, key: &CounterKey, window: Window) -> WindowCounter {
        match self.counters.get(key) {
            Some(counter) if counter.window.start_ms >= window.start_ms => *counter,
            _ => WindowCounter::new(window),
        }
    }
}

#[async_trait]
impl CounterStore for ShardedCounterStore {
    async fn increment(
        &self,
        key: &CounterKey,
        window: Window,
    ) -> Result<WindowCounter, StoreError> {
        Ok(self.increment_now(key, window))
    }

    async fn decrement(&self, key: &CounterKey, window: Window) -> Result<(), StoreError> {
        self.decrement_now(key, window);
        Ok(())
    }

    async fn peek(&self, key: &CounterKey, window: Window) -> Result<WindowCounter, StoreError> {
        Ok(self.peek_now(key, window))
    }

    async fn reset(&self) -> Result<(), StoreError> {
        self.counters.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn key(policy: &str, key: &str) -> CounterKey {
        CounterKey::new(Arc::from(policy), key)
    }

    #[test]
    fn test_increment_counts_within_window() {
        let store = ShardedCounterStore::new();
        let window = Window::aligned(0, 1_000);

        assert_eq!(store.increment_now(&key("a", "k"), window).count, 1);
        assert_eq!(store.increment_now(&key("a", "k"), window).count, 2);
        assert_eq!(store.peek_now(&key("a", "k"), window).count, 2);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_new_window_starts_fresh() {
        let store = ShardedCounterStore::new();
        let first = Window::aligned(999, 1_000);
        let second = Window::aligned(1_001, 1_000);

        store.increment_now(&key("a", "k"), first);
        store.increment_now(&key("a", "k"), first);
        assert_eq!(store.peek_now(&key("a", "k"), second).count, 0);

        let counter = store.increment_now(&key("a", "k"), second);
        assert_eq!(counter.count, 1);
        assert_eq!(counter.window, second);
    }

    #[test]
    fn test_keys_and_policies_are_isolated() {
        let store = ShardedCounterStore::new();
        let window = Window::aligned(0, 1_000);

        store.increment_now(&key("a", "ip1"), window);
        assert_eq!(store.peek_now(&key("a", "ip2"), window).count, 0);
        assert_eq!(store.peek_now(&key("b", "ip1"), window).count, 0);
    }

    #[test]
    fn test_decrement_gives_back_one_request() {
        let store = ShardedCounterStore::new();
        let window = Window::aligned(0, 1_000);

        store.increment_now(&key("a", "k"), window);
        store.increment_now(&key("a", "k"), window);
        store.decrement_now(&key("a", "k"), window);
        assert_eq!(store.peek_now(&key("a", "k"), window).count, 1);

        store.decrement_now(&key("a", "k"), window);
        store.decrement_now(&key("a", "k"), window);
        assert_eq!(store.peek_now(&key("a", "k"), window).count, 0);

        // Unknown keys are not created
        store.decrement_now(&key("a", "missing"), window);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_decrement_ignores_other_windows() {
        let store = ShardedCounterStore::new();
        let first = Window::aligned(0, 1_000);
        let second = Window::aligned(1_000, 1_000);

        store.increment_now(&key("a", "k"), second);
        store.decrement_now(&key("a", "k"), first);
        assert_eq!(store.peek_now(&key("a", "k"), second).count, 1);
    }

    #[test]
    fn test_purge_expired() {
        let store = ShardedCounterStore::new();
        store.increment_now(&key("a", "old"), Window::aligned(0, 1_000));
        store.increment_now(&key("a", "new"), Window::aligned(1_500, 1_000));

        assert_eq!(store.purge_expired(1_000), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.purge_expired(2_000), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_concurrent_increments_are_distinct() {
        let store = ShardedCounterStore::new();
        let window = Window::aligned(0, 60_000);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                thread::spawn(move || {
                    (0..250)
                        .map(|_| store.increment_now(&key("a", "hot"), window).count)
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut counts: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        counts.sort_unstable();

        assert_eq!(counts, (1..=2_000).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_reset() {
        let store = ShardedCounterStore::new();
        let window = Window::aligned(0, 1_000);
        store.increment(&key("a", "k"), window).await.unwrap();

        store.reset().await.unwrap();
        assert!(store.is_empty());
    }
}
