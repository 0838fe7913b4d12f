//! Response caching with tag-based invalidation.
//!
//! [`ResponseCache`] looks up and stores responses in a [`CacheStore`] and
//! accounts hits, misses and errors. [`CacheInvalidator`] is the handle write
//! paths use to evict entries by entity tag after a commit.
//!
//! Entries expire lazily: the store checks freshness at lookup time.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::keys::KeyDeriver;
use crate::application::metrics::Metrics;
use crate::application::ports::{CacheStore, Clock, StoreError};
use crate::domain::cache_entry::{entity_tag, CacheEntry, CachedResponse};
use crate::domain::policy::{FailureMode, KeyGenerator, PolicyError, RequestPredicate};
use crate::domain::request::RequestMeta;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Derives invalidation tags from a request.
pub type TagGenerator = Arc<dyn Fn(&RequestMeta) -> BTreeSet<String> + Send + Sync>;

/// How a wrapped handler is cached.
///
/// # Example
/// ```
/// use request_governor::CacheOptions;
/// use std::time::Duration;
///
/// let options = CacheOptions::new(Duration::from_secs(300))
///     .unwrap()
///     .with_key_prefix("listings:")
///     .with_tags(["hotels"]);
///
/// assert_eq!(options.ttl(), Duration::from_secs(300));
/// ```
#[derive(Clone)]
pub struct CacheOptions {
    ttl: Duration,
    key_prefix: String,
    cache_key: Option<KeyGenerator>,
    skip_cache: Option<RequestPredicate>,
    tags: Option<TagGenerator>,
    failure_mode: FailureMode,
}

impl CacheOptions {
    /// Cache responses for `ttl`.
    ///
    /// # Errors
    /// Returns `PolicyError::ZeroTtl` if `ttl` is zero.
    pub fn new(ttl: Duration) -> Result<Self, PolicyError> {
        if ttl.is_zero() {
            return Err(PolicyError::ZeroTtl);
        }
        Ok(Self {
            ttl,
            key_prefix: String::new(),
            cache_key: None,
            skip_cache: None,
            tags: None,
            failure_mode: FailureMode::Open,
        })
    }

    /// Prefix prepended to every cache key.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Derive the cache key with a custom function.
    ///
    /// Required whenever the response varies by something outside the URL,
    /// such as the authenticated user.
    pub fn with_cache_key(
        mut self,
        generator: impl Fn(&RequestMeta) -> String + Send + Sync + 'static,
    ) -> Self {
        self.cache_key = Some(Arc::new(generator));
        self
    }

    /// Exclude matching requests from both lookup and store.
    ///
    /// Replaces the default, which skips every method other than GET and HEAD.
    pub fn with_skip_cache(
        mut self,
        predicate: impl Fn(&RequestMeta) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip_cache = Some(Arc::new(predicate));
        self
    }

    /// Tag every stored entry with a fixed set of tags.
    pub fn with_tags<I, T>(self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let tags: BTreeSet<String> = tags.into_iter().map(Into::into).collect();
        self.with_tag_generator(move |_| tags.clone())
    }

    /// Derive tags per request.
    pub fn with_tag_generator(
        mut self,
        generator: impl Fn(&RequestMeta) -> BTreeSet<String> + Send + Sync + 'static,
    ) -> Self {
        self.tags = Some(Arc::new(generator));
        self
    }

    /// Choose what happens when the cache store cannot answer.
    ///
    /// `Open` treats the lookup as a miss; `Closed` answers 503.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Time-to-live of stored entries.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Key prefix.
    pub fn key_prefix(&self) -> &str {
        &self.key_prefix
    }

    /// Failure mode for cache store outages.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Whether the request bypasses the cache.
    pub fn should_skip(&self, request: &RequestMeta) -> bool {
        match &self.skip_cache {
            Some(skip) => skip(request),
            None => !request.is_cacheable_method(),
        }
    }

    /// Cache key for a request.
    pub fn key_for(&self, request: &RequestMeta) -> String {
        match &self.cache_key {
            Some(generator) => format!("{}{}", self.key_prefix, generator(request)),
            None => KeyDeriver::cache_key(request, &self.key_prefix),
        }
    }

    /// Invalidation tags for a request's response.
    ///
    /// Defaults to tags derived from the path (entity type and id).
    pub fn tags_for(&self, request: &RequestMeta) -> BTreeSet<String> {
        match &self.tags {
            Some(generator) => generator(request),
            None => KeyDeriver::derive_tags(request.path()),
        }
    }
}

impl fmt::Debug for CacheOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheOptions")
            .field("ttl", &self.ttl)
            .field("key_prefix", &self.key_prefix)
            .field("custom_key", &self.cache_key.is_some())
            .field("custom_skip", &self.skip_cache.is_some())
            .field("custom_tags", &self.tags.is_some())
            .field("failure_mode", &self.failure_mode)
            .finish()
    }
}

/// Result of a cache probe on the request path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// A fresh entry exists
    Hit(CachedResponse),
    /// No usable entry; the handler must run
    Miss,
    /// Store failed and the failure mode is closed
    Unavailable,
}

/// Looks up and stores responses, accounting hits, misses and errors.
#[derive(Debug, Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    circuit_breaker: Arc<CircuitBreaker>,
    store_timeout: Duration,
}

impl ResponseCache {
    /// Create a response cache over `store`.
    pub fn new(
        store: Arc<dyn CacheStore>,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
        circuit_breaker: Arc<CircuitBreaker>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            metrics,
            circuit_breaker,
            store_timeout,
        }
    }

    /// Fetch a fresh entry, recording a hit or a miss.
    ///
    /// A store failure is recorded as a cache error and reported as `None`.
    pub async fn lookup(&self, key: &str) -> Option<CacheEntry> {
        match self.fetch(key).await {
            Ok(Some(entry)) => {
                self.metrics.record_cache_hit();
                debug!(key, "cache hit");
                Some(entry)
            }
            Ok(None) => {
                self.metrics.record_cache_miss();
                debug!(key, "cache miss");
                None
            }
            Err(error) => {
                self.metrics.record_cache_error();
                warn!(key, error = %error, "cache lookup failed");
                None
            }
        }
    }

    /// Probe the cache on the request path.
    ///
    /// Hits and store errors are recorded here. A miss is recorded by the
    /// caller through [`record_miss`](Self::record_miss) once the handler has
    /// succeeded, since a failing handler counts as an error instead.
    pub async fn probe(&self, key: &str, failure_mode: FailureMode) -> CacheLookup {
        match self.fetch(key).await {
            Ok(Some(entry)) => {
                self.metrics.record_cache_hit();
                debug!(key, "cache hit");
                CacheLookup::Hit(entry.response)
            }
            Ok(None) => CacheLookup::Miss,
            Err(error) => {
                self.metrics.record_cache_error();
                warn!(key, error = %error, ?failure_mode, "cache lookup failed");
                match failure_mode {
                    FailureMode::Open => CacheLookup::Miss,
                    FailureMode::Closed => CacheLookup::Unavailable,
                }
            }
        }
    }

    /// Store a response under `key`, overwriting any previous entry.
    ///
    /// # Errors
    /// Returns the store error after recording it.
    pub async fn store(
        &self,
        key: String,
        response: CachedResponse,
        tags: BTreeSet<String>,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let entry = CacheEntry::new(response, tags, self.clock.now_ms(), ttl);
        debug!(key = %key, tags = ?entry.tags, ?ttl, "storing response");

        let result = self
            .circuit_breaker
            .call(self.store_timeout, self.store.put(key.clone(), entry))
            .await;
        if let Err(error) = &result {
            self.metrics.record_cache_error();
            warn!(key = %key, error = %error, "cache store failed");
        }
        result
    }

    /// Account a miss whose handler completed successfully.
    pub fn record_miss(&self) {
        self.metrics.record_cache_miss();
    }

    /// Account a handler failure on the cache path.
    pub fn record_handler_failure(&self) {
        self.metrics.record_cache_error();
    }

    /// Invalidation handle sharing this cache's store.
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator {
            store: Arc::clone(&self.store),
            metrics: self.metrics.clone(),
            store_timeout: self.store_timeout,
        }
    }

    async fn fetch(&self, key: &str) -> Result<Option<CacheEntry>, StoreError> {
        let now_ms = self.clock.now_ms();
        self.circuit_breaker
            .call(self.store_timeout, self.store.get(key, now_ms))
            .await
    }
}

/// Evicts cached responses by tag.
///
/// Invalidation bypasses the circuit breaker: a write path must learn that
/// eviction failed rather than have it silently skipped.
#[derive(Debug, Clone)]
pub struct CacheInvalidator {
    store: Arc<dyn CacheStore>,
    metrics: Metrics,
    store_timeout: Duration,
}

impl CacheInvalidator {
    /// Evict every entry tagged `entity_type`, and with an id also every
    /// entry tagged `entity_type:entity_id`.
    ///
    /// Returns how many entries were removed.
    pub async fn invalidate_entity(
        &self,
        entity_type: &str,
        entity_id: Option<&str>,
    ) -> Result<usize, StoreError> {
        let mut tags = vec![entity_type.to_string()];
        if let Some(id) = entity_id {
            tags.push(entity_tag(entity_type, id));
        }
        self.invalidate_tags(&tags).await
    }

    /// Evict every entry carrying any of `tags`.
    pub async fn invalidate_tags(&self, tags: &[String]) -> Result<usize, StoreError> {
        let removed = tokio::time::timeout(self.store_timeout, self.store.invalidate_tags(tags))
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))??;

        self.metrics.record_invalidated(removed);
        debug!(?tags, removed, "cache invalidated by tag");
        Ok(removed)
    }

    /// Clear the whole cache.
    pub async fn invalidate_all(&self) -> Result<(), StoreError> {
        tokio::time::timeout(self.store_timeout, self.store.clear())
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))??;

        info!("cache cleared");
        Ok(())
    }
}
