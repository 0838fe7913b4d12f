//! HTTP governance middleware.
//!
//! Wraps async request handlers with rate limiting and response caching.
//! A governed request moves through:
//!
//! ```text
//! rate check ─┬─ denied ──────────────────────────────► 429
//!             └─ admitted ─► cache lookup ─┬─ hit ────► stored response
//!                                          └─ miss ───► handler ─► store ─► response
//! ```
//!
//! Handlers take and return `http` types with `Bytes` bodies, so any server
//! that can buffer bodies can host them.

use crate::application::{
    cache::{CacheInvalidator, CacheLookup, CacheOptions, ResponseCache},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig},
    limiter::RateLimiter,
    metrics::Metrics,
    ports::{CacheStore, Clock, CounterStore, StoreError},
    registry::PolicyRegistry,
};
use crate::domain::{
    cache_entry::CachedResponse,
    policy::{PolicyError, PolicyPreset, RateLimitPolicy, RequestOutcome},
    request::RequestMeta,
    window::Decision,
};
use crate::infrastructure::cache_store::ShardedCacheStore;
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::counter_store::ShardedCounterStore;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, RETRY_AFTER};
use http::{Request, Response, StatusCode};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Error type returned by handlers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Quota ceiling of the policy that answered.
pub const RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("ratelimit-limit");
/// Requests left in the current window.
pub const RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("ratelimit-remaining");
/// Seconds until the current window ends.
pub const RATELIMIT_RESET: HeaderName = HeaderName::from_static("ratelimit-reset");
/// `HIT` or `MISS` on cached routes.
pub const X_CACHE: HeaderName = HeaderName::from_static("x-cache");

const UNAVAILABLE_MESSAGE: &str = "Service temporarily unavailable, please try again later.";

/// An async request handler.
///
/// Implemented for every `Fn(Request<Bytes>) -> impl Future<Output =
/// Result<Response<Bytes>, BoxError>>` closure, and for the wrappers this
/// module returns, so wrappers compose.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Handle one request.
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError>;
}

#[async_trait]
impl<F, Fut> Handler for F
where
    F: Fn(Request<Bytes>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response<Bytes>, BoxError>> + Send + 'static,
{
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
        (self)(request).await
    }
}

/// Error returned when building a [`Governor`] fails.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    /// Store calls need a positive deadline
    #[error("store timeout must be greater than 0")]
    ZeroStoreTimeout,
    /// Breaker would open before any failure
    #[error("circuit breaker failure threshold must be greater than 0")]
    ZeroFailureThreshold,
    /// A policy could not be registered
    #[error(transparent)]
    Policy(#[from] PolicyError),
}

/// Builder for constructing a [`Governor`].
pub struct GovernorBuilder {
    clock: Option<Arc<dyn Clock>>,
    counter_store: Option<Arc<dyn CounterStore>>,
    cache_store: Option<Arc<dyn CacheStore>>,
    store_timeout: Duration,
    breaker_config: CircuitBreakerConfig,
    metrics: Option<Metrics>,
    presets: bool,
    policies: Vec<RateLimitPolicy>,
}

impl GovernorBuilder {
    /// Set a custom clock (mainly for testing).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Use a custom counter store, e.g. a shared Redis instance.
    ///
    /// Default: an in-process [`ShardedCounterStore`].
    pub fn with_counter_store(mut self, store: Arc<dyn CounterStore>) -> Self {
        self.counter_store = Some(store);
        self
    }

    /// Use a custom cache store.
    ///
    /// Default: an unbounded in-process [`ShardedCacheStore`].
    pub fn with_cache_store(mut self, store: Arc<dyn CacheStore>) -> Self {
        self.cache_store = Some(store);
        self
    }

    /// Deadline for every store call before the failure mode applies.
    ///
    /// Default: 100ms
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Configure the breakers guarding each store.
    pub fn with_breaker_config(mut self, config: CircuitBreakerConfig) -> Self {
        self.breaker_config = config;
        self
    }

    /// Share an existing metrics tracker.
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Register a named policy.
    ///
    /// Names must be unique; duplicates are reported by `build()`.
    pub fn with_policy(mut self, policy: RateLimitPolicy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Register every [`PolicyPreset`].
    pub fn with_presets(mut self) -> Self {
        self.presets = true;
        self
    }

    /// Build the governor.
    ///
    /// # Errors
    /// Returns `BuildError` if the configuration is invalid.
    pub fn build(self) -> Result<Governor, BuildError> {
        if self.store_timeout.is_zero() {
            return Err(BuildError::ZeroStoreTimeout);
        }
        if self.breaker_config.failure_threshold == 0 {
            return Err(BuildError::ZeroFailureThreshold);
        }

        let mut registry = if self.presets {
            PolicyRegistry::with_presets()
        } else {
            PolicyRegistry::new()
        };
        for policy in self.policies {
            registry.register(policy)?;
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock::new()));
        let metrics = self.metrics.unwrap_or_default();
        let counter_store = self
            .counter_store
            .unwrap_or_else(|| Arc::new(ShardedCounterStore::new()));
        let cache_store = self
            .cache_store
            .unwrap_or_else(|| Arc::new(ShardedCacheStore::new()));

        let limiter = RateLimiter::new(
            counter_store,
            Arc::clone(&clock),
            metrics.clone(),
            Arc::new(CircuitBreaker::new(
                self.breaker_config.clone(),
                Arc::clone(&clock),
            )),
            self.store_timeout,
        );
        let cache = ResponseCache::new(
            cache_store,
            Arc::clone(&clock),
            metrics.clone(),
            Arc::new(CircuitBreaker::new(self.breaker_config, clock)),
            self.store_timeout,
        );

        Ok(Governor {
            limiter,
            cache,
            policies: Arc::new(registry),
            metrics,
        })
    }
}

/// Entry point of the governance layer.
///
/// Owns the rate limiter, the response cache and the named policies, and
/// wraps handlers with them. Cloning is cheap and shares all state.
///
/// # Example
/// ```
/// use bytes::Bytes;
/// use http::{Request, Response};
/// use request_governor::{BoxError, CacheOptions, Governor, Handler, PolicyPreset};
/// use std::time::Duration;
///
/// async fn list_hotels(_req: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
///     Ok(Response::new(Bytes::from_static(b"[]")))
/// }
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let governor = Governor::builder().with_presets().build().unwrap();
/// let policy = governor.preset(PolicyPreset::Public).unwrap();
/// let options = CacheOptions::new(Duration::from_secs(60)).unwrap();
/// let handler = governor.governed(list_hotels, policy, options);
///
/// let response = handler
///     .call(Request::get("/api/hotels").body(Bytes::new()).unwrap())
///     .await
///     .unwrap();
/// assert_eq!(response.headers()["x-cache"], "MISS");
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Governor {
    limiter: RateLimiter,
    cache: ResponseCache,
    policies: Arc<PolicyRegistry>,
    metrics: Metrics,
}

impl Governor {
    /// Create a builder for configuring the governor.
    ///
    /// Defaults:
    /// - Clock: [`SystemClock`]
    /// - Stores: in-process sharded maps, unbounded
    /// - Store timeout: 100ms
    /// - Circuit breaker: opens after 5 consecutive failures, retries after 30s
    /// - Policies: none
    pub fn builder() -> GovernorBuilder {
        GovernorBuilder {
            clock: None,
            counter_store: None,
            cache_store: None,
            store_timeout: Duration::from_millis(100),
            breaker_config: CircuitBreakerConfig::default(),
            metrics: None,
            presets: false,
            policies: Vec::new(),
        }
    }

    /// Wrap `handler` with a rate limit.
    ///
    /// Counters are scoped by policy name only. Policies passed here are not
    /// registered, so two of them sharing a name share one quota. A warning
    /// is logged when `policy` shadows a different registered policy of the
    /// same name.
    pub fn with_rate_limit<H>(
        &self,
        handler: H,
        policy: impl Into<Arc<RateLimitPolicy>>,
    ) -> RateLimited<H>
    where
        H: Handler,
    {
        let policy = policy.into();
        if let Some(registered) = self.policies.get(policy.name()) {
            if !Arc::ptr_eq(&registered, &policy) {
                warn!(
                    policy = policy.name(),
                    "unregistered policy shares counters with a registered policy of the same name"
                );
            }
        }
        RateLimited {
            inner: handler,
            policy,
            limiter: self.limiter.clone(),
        }
    }

    /// Wrap `handler` with response caching.
    pub fn with_cache<H>(&self, handler: H, options: CacheOptions) -> Cached<H>
    where
        H: Handler,
    {
        Cached {
            inner: handler,
            options: Arc::new(options),
            cache: self.cache.clone(),
        }
    }

    /// Wrap `handler` with a rate limit in front of response caching.
    ///
    /// Throttled requests never reach the cache.
    pub fn governed<H>(
        &self,
        handler: H,
        policy: impl Into<Arc<RateLimitPolicy>>,
        options: CacheOptions,
    ) -> RateLimited<Cached<H>>
    where
        H: Handler,
    {
        self.with_rate_limit(self.with_cache(handler, options), policy)
    }

    /// Look up a registered policy by name.
    pub fn policy(&self, name: &str) -> Option<Arc<RateLimitPolicy>> {
        self.policies.get(name)
    }

    /// Look up the policy registered for a preset.
    pub fn preset(&self, preset: PolicyPreset) -> Option<Arc<RateLimitPolicy>> {
        self.policies.preset(preset)
    }

    /// Registered policies.
    pub fn policies(&self) -> &PolicyRegistry {
        &self.policies
    }

    /// Invalidation handle for write paths.
    pub fn invalidator(&self) -> CacheInvalidator {
        self.cache.invalidator()
    }

    /// Get a reference to the rate limiter.
    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Get a reference to the response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Drop every counter and cached response and zero the metrics.
    ///
    /// # Errors
    /// Returns the first store error encountered.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.limiter.reset().await?;
        self.cache.invalidator().invalidate_all().await?;
        self.metrics.reset();
        Ok(())
    }
}

/// Handler wrapped with a rate limit.
#[derive(Debug, Clone)]
pub struct RateLimited<H> {
    inner: H,
    policy: Arc<RateLimitPolicy>,
    limiter: RateLimiter,
}

impl<H> RateLimited<H> {
    /// Policy applied to every request.
    pub fn policy(&self) -> &RateLimitPolicy {
        &self.policy
    }
}

#[async_trait]
impl<H> Handler for RateLimited<H>
where
    H: Handler,
{
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
        let meta = RequestMeta::from_request(&request);
        let decision = self.limiter.check(&meta, &self.policy).await;
        let now_ms = self.limiter.now_ms();

        if !decision.allowed {
            return Ok(throttled_response(&self.policy, &decision, now_ms));
        }

        let result = self.inner.call(request).await;
        let outcome = match &result {
            Ok(response) => RequestOutcome::from_status(response.status()),
            Err(_) => RequestOutcome::Failed,
        };
        self.limiter
            .complete(&meta, &self.policy, &decision, outcome)
            .await;

        let mut response = result?;
        if !decision.exempt {
            insert_rate_limit_headers(response.headers_mut(), &decision, now_ms);
        }
        Ok(response)
    }
}

/// Handler wrapped with response caching.
#[derive(Debug, Clone)]
pub struct Cached<H> {
    inner: H,
    options: Arc<CacheOptions>,
    cache: ResponseCache,
}

impl<H> Cached<H> {
    /// Caching options of this handler.
    pub fn options(&self) -> &CacheOptions {
        &self.options
    }
}

#[async_trait]
impl<H> Handler for Cached<H>
where
    H: Handler,
{
    async fn call(&self, request: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
        let meta = RequestMeta::from_request(&request);
        if self.options.should_skip(&meta) {
            debug!(path = meta.path(), method = %meta.method(), "cache bypassed");
            return self.inner.call(request).await;
        }

        let key = self.options.key_for(&meta);
        match self.cache.probe(&key, self.options.failure_mode()).await {
            CacheLookup::Hit(cached) => {
                let mut response = cached.to_response();
                response
                    .headers_mut()
                    .insert(X_CACHE, HeaderValue::from_static("HIT"));
                return Ok(response);
            }
            CacheLookup::Unavailable => return Ok(unavailable_response()),
            CacheLookup::Miss => {}
        }

        let mut response = match self.inner.call(request).await {
            Ok(response) => response,
            Err(error) => {
                self.cache.record_handler_failure();
                debug!(key = %key, error = %error, "handler failed, nothing cached");
                return Err(error);
            }
        };

        self.cache.record_miss();
        debug!(key = %key, "cache miss");
        if response.status().is_success() {
            let tags = self.options.tags_for(&meta);
            // Store failures are counted and logged by the cache.
            let _ = self
                .cache
                .store(
                    key,
                    CachedResponse::from_response(&response),
                    tags,
                    self.options.ttl(),
                )
                .await;
        }

        response
            .headers_mut()
            .insert(X_CACHE, HeaderValue::from_static("MISS"));
        Ok(response)
    }
}

fn insert_rate_limit_headers(headers: &mut HeaderMap, decision: &Decision, now_ms: u64) {
    headers.insert(RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(
        RATELIMIT_RESET,
        HeaderValue::from(decision.retry_after_secs(now_ms)),
    );
}

fn json_response(status: StatusCode, message: &str) -> Response<Bytes> {
    let body = serde_json::json!({ "message": message }).to_string();
    let mut response = Response::new(Bytes::from(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn throttled_response(policy: &RateLimitPolicy, decision: &Decision, now_ms: u64) -> Response<Bytes> {
    let mut response = json_response(StatusCode::TOO_MANY_REQUESTS, policy.message());
    let headers = response.headers_mut();
    insert_rate_limit_headers(headers, decision, now_ms);
    headers.insert(
        RETRY_AFTER,
        HeaderValue::from(decision.retry_after_secs(now_ms)),
    );
    response
}

fn unavailable_response() -> Response<Bytes> {
    json_response(StatusCode::SERVICE_UNAVAILABLE, UNAVAILABLE_MESSAGE)
}
