//! Infrastructure layer - external adapters and integrations.
//!
//! This layer provides adapters for:
//! - Clock abstraction (system time vs mock)
//! - Store implementations (sharded maps, Redis)
//! - HTTP middleware wrapping handlers
//! - TOML configuration

pub mod cache_store;
pub mod clock;
pub mod counter_store;
pub mod middleware;

#[cfg(feature = "config")]
pub mod config;

#[cfg(feature = "redis-storage")]
pub mod redis_counter_store;

/// Mock implementations for testing.
///
/// This module is only available when the `test-helpers` feature is enabled,
/// or during test builds. It provides a controllable clock and stores that
/// fail or stall on demand.
///
/// To use these mocks in integration tests, add to your `Cargo.toml`:
/// ```toml
/// [dev-dependencies]
/// request-governor = { version = "*", features = ["test-helpers"] }
/// ```
#[cfg(any(test, feature = "test-helpers"))]
pub mod mocks;
