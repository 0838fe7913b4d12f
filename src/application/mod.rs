//! Application layer - orchestration and ports.
//!
//! This layer coordinates rate limiting and response caching:
//! - Port traits for time and backing stores
//! - Rate limiter and named policy registry
//! - Response cache and tag invalidation
//! - Store health circuit breaker and metrics

pub mod cache;
pub mod circuit_breaker;
pub mod keys;
pub mod limiter;
pub mod metrics;
pub mod ports;
pub mod registry;
