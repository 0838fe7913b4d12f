//! Circuit breaker for backing store calls.
//!
//! Implements a circuit breaker pattern so that an unreachable store is not
//! hammered on every request. While the circuit is open, callers skip the
//! store and apply their configured failure mode directly.
//!
//! Time is read from the injected [`Clock`], so recovery can be tested
//! deterministically.

use crate::application::ports::{Clock, StoreError};
use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Circuit breaker states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Circuit is closed, operating normally
    Closed = 0,
    /// Circuit is open due to failures, the store is bypassed
    Open = 1,
    /// Circuit is testing if the store has recovered
    HalfOpen = 2,
}

impl From<u8> for CircuitState {
    fn from(value: u8) -> Self {
        match value {
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            _ => CircuitState::Closed,
        }
    }
}

/// Configuration for circuit breaker behavior.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening circuit
    pub failure_threshold: u32,
    /// Duration to wait before attempting recovery
    pub recovery_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit breaker guarding one backing store.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: AtomicU8,
    consecutive_failures: AtomicU64,
    last_failure_ms: AtomicU64,
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    /// Create a circuit breaker with custom configuration.
    pub fn new(config: CircuitBreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            state: AtomicU8::new(CircuitState::Closed as u8),
            consecutive_failures: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            config,
            clock,
        }
    }

    /// Get the current circuit state.
    pub fn state(&self) -> CircuitState {
        CircuitState::from(self.state.load(Ordering::Acquire))
    }

    /// Check whether the store should be called.
    ///
    /// Returns `false` while the circuit is open and the recovery timeout has
    /// not elapsed.
    pub fn allow_request(&self) -> bool {
        match self.state() {
            CircuitState::Closed | CircuitState::HalfOpen => true,
            CircuitState::Open => {
                let elapsed = self
                    .clock
                    .now_ms()
                    .saturating_sub(self.last_failure_ms.load(Ordering::Acquire));
                let recovery_ms =
                    u64::try_from(self.config.recovery_timeout.as_millis()).unwrap_or(u64::MAX);

                if elapsed >= recovery_ms {
                    // Only one caller performs the transition
                    let result = self.state.compare_exchange(
                        CircuitState::Open as u8,
                        CircuitState::HalfOpen as u8,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    );
                    result.is_ok() || self.state() == CircuitState::HalfOpen
                } else {
                    false
                }
            }
        }
    }

    /// Record a successful store call.
    pub fn record_success(&self) {
        match self.state() {
            CircuitState::HalfOpen | CircuitState::Closed => {
                self.consecutive_failures.store(0, Ordering::Release);
                self.state
                    .store(CircuitState::Closed as u8, Ordering::Release);
            }
            CircuitState::Open => {}
        }
    }

    /// Record a failed store call.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        self.last_failure_ms
            .store(self.clock.now_ms(), Ordering::Release);

        match self.state() {
            CircuitState::HalfOpen => {
                self.state.store(CircuitState::Open as u8, Ordering::Release);
            }
            CircuitState::Closed => {
                if failures >= u64::from(self.config.failure_threshold) {
                    self.state.store(CircuitState::Open as u8, Ordering::Release);
                }
            }
            CircuitState::Open => {}
        }
    }

    /// Get the number of consecutive failures.
    pub fn consecutive_failures(&self) -> u64 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Reset the circuit breaker to closed state.
    pub fn reset(&self) {
        self.state
            .store(CircuitState::Closed as u8, Ordering::Release);
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Run a store operation through the breaker with a deadline.
    ///
    /// Returns `StoreError::CircuitOpen` without polling `operation` while the
    /// circuit is open. Errors and timeouts count as failures.
    pub async fn call<T, F>(&self, timeout: Duration, operation: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        if !self.allow_request() {
            return Err(StoreError::CircuitOpen);
        }

        match tokio::time::timeout(timeout, operation).await {
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure();
                Err(error)
            }
            Err(_) => {
                self.record_failure();
                Err(StoreError::Timeout(timeout))
            }
        }
    }
}
