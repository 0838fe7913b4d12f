//! In-process cache store with a tag index.
//!
//! Entries live in one sharded map; a second map indexes cache keys by tag
//! so invalidation touches only the affected entries.
//!
//! # Consistency
//!
//! `put` inserts the entry and updates its tag index while holding the
//! entry's shard lock, so concurrent writers of one key index their tags one
//! after the other. Invalidation drains a tag's key set before removing the
//! entries. An entry stored concurrently with an invalidation of one of its
//! tags is therefore either removed or indexed under the tag for the next
//! invalidation; it is never left reachable and unindexed.

use crate::application::ports::{CacheStore, StoreError};
use crate::domain::cache_entry::CacheEntry;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::collections::HashSet;
use std::sync::Arc;

/// Number of entries examined when choosing an eviction victim.
const EVICTION_SAMPLE: usize = 16;

type Entries = DashMap<String, CacheEntry, ahash::RandomState>;
type TagIndex = DashMap<String, DashSet<String, ahash::RandomState>, ahash::RandomState>;

/// Thread-safe sharded cache store backed by DashMap.
///
/// Entries are immutable once stored and are cloned out on lookup, so a
/// reader racing a writer sees either the old or the new entry, never a mix.
/// Clones share the same maps.
#[derive(Debug, Clone, Default)]
pub struct ShardedCacheStore {
    entries: Arc<Entries>,
    tags: Arc<TagIndex>,
    max_entries: Option<usize>,
}

impl ShardedCacheStore {
    /// Create an unbounded store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the store to `max_entries`.
    ///
    /// When full, expired entries are dropped first, then the oldest stored
    /// entry among a small sample is evicted.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries.max(1));
        self
    }

    /// Remove entries that are no longer fresh at `now_ms`.
    ///
    /// Returns how many were removed.
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|entry| !entry.value().is_fresh(now_ms))
            .map(|entry| entry.key().clone())
            .collect();

        expired
            .iter()
            .filter(|key| self.remove_expired(key, now_ms))
            .count()
    }

    /// Get the number of entries held, fresh or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of cache keys indexed under `tag`.
    pub fn tagged(&self, tag: &str) -> usize {
        self.tags.get(tag).map(|keys| keys.len()).unwrap_or(0)
    }

    fn get_now(&self, key: &str, now_ms: u64) -> Option<CacheEntry> {
        let entry = self.entries.get(key).map(|entry| entry.value().clone())?;
        if entry.is_fresh(now_ms) {
            return Some(entry);
        }
        self.remove_expired(key, now_ms);
        None
    }

    fn put_now(&self, key: String, entry: CacheEntry) {
        if let Some(max_entries) = self.max_entries {
            if !self.entries.contains_key(&key) && self.entries.len() >= max_entries {
                self.make_room(entry.stored_at_ms, max_entries);
            }
        }

        let new_tags = entry.tags.clone();
        // Lock order is entries then tags; nothing takes them the other way.
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => {
                let previous = occupied.insert(entry);
                self.index(occupied.key(), &new_tags);
                let stale = previous.tags.iter().filter(|tag| !new_tags.contains(*tag));
                self.unindex(occupied.key(), stale);
            }
            Entry::Vacant(vacant) => {
                let stored = vacant.insert(entry);
                self.index(stored.key(), &new_tags);
            }
        }
    }

    fn index<'a>(&self, key: &str, tags: impl IntoIterator<Item = &'a String>) {
        for tag in tags {
            self.tags
                .entry(tag.clone())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn invalidate_now(&self, tags: &[String]) -> usize {
        let mut keys = HashSet::new();
        for tag in tags {
            if let Some((_, tagged)) = self.tags.remove(tag) {
                keys.extend(tagged);
            }
        }

        keys.iter().filter(|key| self.remove_entry(key)).count()
    }

    fn clear_now(&self) {
        self.entries.clear();
        self.tags.clear();
    }

    fn remove_entry(&self, key: &str) -> bool {
        match self.entries.remove(key) {
            Some((key, entry)) => {
                self.unindex(&key, entry.tags.iter());
                true
            }
            None => false,
        }
    }

    /// Remove `key` only if it is still expired, so a concurrent overwrite survives.
    fn remove_expired(&self, key: &str, now_ms: u64) -> bool {
        match self
            .entries
            .remove_if(key, |_, entry| !entry.is_fresh(now_ms))
        {
            Some((key, entry)) => {
                self.unindex(&key, entry.tags.iter());
                true
            }
            None => false,
        }
    }

    fn unindex<'a>(&self, key: &str, tags: impl Iterator<Item = &'a String>) {
        for tag in tags {
            let emptied = self
                .tags
                .get(tag.as_str())
                .map(|keys| {
                    keys.remove(key);
                    keys.is_empty()
                })
                .unwrap_or(false);
            if emptied {
                self.tags.remove_if(tag.as_str(), |_, keys| keys.is_empty());
            }
        }
    }

    fn make_room(&self, now_ms: u64, max_entries: usize) {
        if self.purge_expired(now_ms) > 0 && self.entries.len() < max_entries {
            return;
        }

        let victim = self
            .entries
            .iter()
            .take(EVICTION_SAMPLE)
            .min_by_key(|entry| entry.value().stored_at_ms)
            .map(|entry| entry.key().clone());

        if let Some(victim) = victim {
            self.remove_entry(&victim);
        }
    }
}

#[async_trait]
impl CacheStore for ShardedCacheStore {
    async fn get(&self, key: &str, now_ms: u64) -> Result<Option<CacheEntry>, StoreError> {
        Ok(self.get_now(key, now_ms))
    }

    async fn put(&self, key: String, entry: CacheEntry) -> Result<(), StoreError> {
        self.put_now(key, entry);
        Ok(())
    }

    async fn invalidate_tags(&self, tags: &[String]) -> Result<usize, StoreError> {
        Ok(self.invalidate_now(tags))
    }

    async fn clear(&self) -> Result<(), StoreError> {
        self.clear_now();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cache_entry::CachedResponse;
    use bytes::Bytes;
    use http::StatusCode;
    use std::collections::BTreeSet;
    use std::thread;
    use std::time::Duration;

    fn entry(body: &'static str, tags: &[&str], stored_at_ms: u64) -> CacheEntry {
        CacheEntry::new(
            CachedResponse {
                status: StatusCode::OK,
                content_type: None,
                body: Bytes::from_static(body.as_bytes()),
            },
            tags.iter().map(|t| t.to_string()).collect::<BTreeSet<_>>(),
            stored_at_ms,
            Duration::from_secs(60),
        )
    }

    fn tags(items: &[&str]) -> Vec<String> {
        items.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_get_returns_stored_bytes() {
        let store = ShardedCacheStore::new();
        store.put_now("k".into(), entry("payload", &["hotels"], 0));

        let found = store.get_now("k", 1).unwrap();
        assert_eq!(found.response.body, Bytes::from_static(b"payload"));
        assert!(store.get_now("other", 1).is_none());
    }

    #[test]
    fn test_expired_entries_are_removed_on_lookup() {
        let store = ShardedCacheStore::new();
        store.put_now("k".into(), entry("payload", &["hotels"], 0));

        assert!(store.get_now("k", 60_000).is_none());
        assert!(store.is_empty());
        assert_eq!(store.tagged("hotels"), 0);
    }

    #[test]
    fn test_overwrite_reindexes_tags() {
        let store = ShardedCacheStore::new();
        store.put_now("k".into(), entry("v1", &["hotels", "hotels:1"], 0));
        store.put_now("k".into(), entry("v2", &["hotels"], 10));

        assert_eq!(store.tagged("hotels"), 1);
        assert_eq!(store.tagged("hotels:1"), 0);
        assert_eq!(
            store.get_now("k", 20).unwrap().response.body,
            Bytes::from_static(b"v2")
        );
    }

    #[test]
    fn test_concurrent_overwrites_leave_live_tags_indexed() {
        let store = ShardedCacheStore::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                thread::spawn(move || {
                    let tag = if i % 2 == 0 { "hotels" } else { "rooms" };
                    for _ in 0..500 {
                        store.put_now("k".into(), entry("payload", &[tag], 0));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let live = store.get_now("k", 1).unwrap();
        for tag in ["hotels", "rooms"] {
            let expected = usize::from(live.tags.contains(tag));
            assert_eq!(store.tagged(tag), expected, "tag {tag}");
        }

        let live_tag = live.tags.iter().next().unwrap().clone();
        assert_eq!(store.invalidate_now(&[live_tag]), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_invalidation_is_precise() {
        let store = ShardedCacheStore::new();
        store.put_now("h".into(), entry("h", &["hotels"], 0));
        store.put_now("h1".into(), entry("h1", &["hotels", "hotels:1"], 0));
        store.put_now("r".into(), entry("r", &["restaurants"], 0));

        assert_eq!(store.invalidate_now(&tags(&["hotels:1"])), 1);
        assert!(store.get_now("h", 1).is_some());
        assert!(store.get_now("h1", 1).is_none());

        assert_eq!(store.invalidate_now(&tags(&["hotels", "missing"])), 1);
        assert!(store.get_now("h", 1).is_none());
        assert!(store.get_now("r", 1).is_some());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_entry_with_two_matching_tags_counts_once() {
        let store = ShardedCacheStore::new();
        store.put_now("h1".into(), entry("h1", &["hotels", "hotels:1"], 0));

        assert_eq!(store.invalidate_now(&tags(&["hotels", "hotels:1"])), 1);
        assert_eq!(store.tagged("hotels:1"), 0);
    }

    #[test]
    fn test_bounded_store_evicts_oldest() {
        let store = ShardedCacheStore::new().with_max_entries(2);
        store.put_now("a".into(), entry("a", &["t"], 0));
        store.put_now("b".into(), entry("b", &["t"], 10));
        store.put_now("c".into(), entry("c", &["t"], 20));

        assert_eq!(store.len(), 2);
        assert!(store.get_now("a", 30).is_none());
        assert!(store.get_now("b", 30).is_some());
        assert!(store.get_now("c", 30).is_some());
        assert_eq!(store.tagged("t"), 2);
    }

    #[test]
    fn test_bounded_store_prefers_expired() {
        let store = ShardedCacheStore::new().with_max_entries(2);
        store.put_now("old".into(), entry("old", &[], 0));
        store.put_now("b".into(), entry("b", &[], 50_000));
        store.put_now("c".into(), entry("c", &[], 70_000));

        assert!(store.get_now("b", 70_000).is_some());
        assert!(store.get_now("c", 70_000).is_some());
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_purge_expired() {
        let store = ShardedCacheStore::new();
        store.put_now("a".into(), entry("a", &["t"], 0));
        store.put_now("b".into(), entry("b", &["t"], 30_000));

        assert_eq!(store.purge_expired(60_000), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(store.tagged("t"), 1);
    }

    #[tokio::test]
    async fn test_clear() {
        let store = ShardedCacheStore::new();
        store.put("a".into(), entry("a", &["t"], 0)).await.unwrap();

        store.clear().await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.tagged("t"), 0);
    }
}
