//! # request-governor
//!
//! Fixed-window admission control and tag-invalidated response caching for
//! async HTTP handlers.
//!
//! A [`Governor`] wraps handlers with two independent concerns:
//!
//! - **Rate limiting**: named [`RateLimitPolicy`]s admit at most
//!   `max_requests` per fixed, epoch-aligned window and per key (client IP +
//!   path by default). Throttled callers get a `429` with a JSON message and
//!   `ratelimit-*` / `retry-after` headers.
//! - **Response caching**: `GET`/`HEAD` responses are stored under a key
//!   derived from method, normalized path and sorted query, and tagged so a
//!   write path can invalidate exactly the entries it affects.
//!
//! ## Quick Start
//!
//! ```rust
//! use bytes::Bytes;
//! use http::{Request, Response, StatusCode};
//! use request_governor::{BoxError, CacheOptions, Governor, Handler, PolicyPreset};
//! use std::time::Duration;
//!
//! async fn search(_req: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
//!     Ok(Response::new(Bytes::from_static(b"{\"results\":[]}")))
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let governor = Governor::builder().with_presets().build().unwrap();
//!
//! let handler = governor.governed(
//!     search,
//!     governor.preset(PolicyPreset::Search).unwrap(),
//!     CacheOptions::new(Duration::from_secs(30)).unwrap(),
//! );
//!
//! let request = Request::get("/api/search?q=paris").body(Bytes::new()).unwrap();
//! let response = handler.call(request).await.unwrap();
//! assert_eq!(response.status(), StatusCode::OK);
//! assert_eq!(response.headers()["ratelimit-limit"], "30");
//! # }
//! ```
//!
//! ## Policies
//!
//! Policies are validated when constructed and are immutable afterwards:
//!
//! ```rust
//! use request_governor::{FailureMode, RateLimitPolicy};
//! use std::time::Duration;
//!
//! let login = RateLimitPolicy::new("login", Duration::from_secs(15 * 60), 5)
//!     .unwrap()
//!     .with_message("Too many login attempts.")
//!     // Only failed attempts consume quota
//!     .skip_successful_requests(true)
//!     // Deny while the counter store is unreachable
//!     .with_failure_mode(FailureMode::Closed);
//!
//! assert!(login.defers_counting());
//! assert!(RateLimitPolicy::new("broken", Duration::ZERO, 5).is_err());
//! ```
//!
//! Five presets ([`PolicyPreset`]) cover the usual route classes: `PUBLIC`,
//! `SEARCH`, `AUTH`, `USER_CONTENT` and `ADMIN`.
//!
//! ## Keys and Tags
//!
//! ```rust
//! use http::Method;
//! use request_governor::{KeyDeriver, RequestMeta};
//!
//! let meta = RequestMeta::new(Method::GET, "/api/v1/hotels/42/");
//! assert_eq!(KeyDeriver::cache_key(&meta, "cache:"), "cache:GET/api/v1/hotels/42");
//!
//! let tags = KeyDeriver::derive_tags(meta.path());
//! assert!(tags.contains("hotels"));
//! assert!(tags.contains("hotels:42"));
//! ```
//!
//! Write paths invalidate through a [`CacheInvalidator`]:
//!
//! ```rust
//! # use request_governor::Governor;
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! # let governor = Governor::builder().build().unwrap();
//! let invalidator = governor.invalidator();
//! // Drops every entry tagged `hotels:42`, plus the `hotels` listings
//! invalidator.invalidate_entity("hotels", Some("42")).await.unwrap();
//! # }
//! ```
//!
//! ## Store Failures
//!
//! Every store call runs under a deadline and behind a circuit breaker.
//! When a store cannot answer, the policy's (or cache options')
//! [`FailureMode`] decides: `Open` admits the request (or treats the lookup
//! as a miss), `Closed` answers `429` (or `503` for the cache).
//!
//! ## Observability
//!
//! Counters are kept in-process ([`Metrics`]) and mirrored to the
//! [`metrics`](https://docs.rs/metrics) facade under the names in
//! [`telemetry`]. Decisions and store errors are logged with `tracing`.
//!
//! ## Features
//!
//! - `redis-storage`: [`RedisCounterStore`] for counters shared across instances
//! - `config`: `GovernanceConfig`, policies and cache settings from TOML
//! - `test-helpers`: mock clock and fault-injecting stores

// Domain layer - pure types
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

pub mod telemetry;

// Re-export commonly used types for convenience
pub use domain::{
    cache_entry::{entity_tag, CacheEntry, CachedResponse},
    policy::{
        FailureMode, KeyGenerator, PolicyError, PolicyPreset, RateLimitPolicy, RequestOutcome,
        RequestPredicate, DEFAULT_MESSAGE,
    },
    request::{ClientAddr, Identity, RequestMeta},
    window::{Decision, Window, WindowCounter},
};

pub use application::{
    cache::{CacheInvalidator, CacheLookup, CacheOptions, ResponseCache, TagGenerator},
    circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState},
    keys::KeyDeriver,
    limiter::RateLimiter,
    metrics::{Metrics, MetricsSnapshot},
    ports::{CacheStore, Clock, CounterKey, CounterStore, StoreError},
    registry::PolicyRegistry,
};

pub use infrastructure::{
    cache_store::ShardedCacheStore,
    clock::SystemClock,
    counter_store::ShardedCounterStore,
    middleware::{
        BoxError, BuildError, Cached, Governor, GovernorBuilder, Handler, RateLimited,
    },
};

#[cfg(feature = "config")]
pub use infrastructure::config::{ConfigError, GovernanceConfig, PolicyConfig};

#[cfg(feature = "redis-storage")]
pub use infrastructure::redis_counter_store::{RedisCounterStore, RedisCounterStoreConfig};
