//! Rate limiter coordination logic.
//!
//! The rate limiter decides whether a request may proceed under a policy,
//! counts it in the current fixed window and reports remaining quota.
//!
//! Every checked request takes a slot atomically in [`RateLimiter::check`],
//! so racing requests on one key never share the last slot. Policies with
//! `skip_successful_requests` or `skip_failed_requests` give the slot back
//! in [`RateLimiter::complete`] once the outcome turns out not to count.

use crate::application::circuit_breaker::CircuitBreaker;
use crate::application::keys::KeyDeriver;
use crate::application::metrics::Metrics;
use crate::application::ports::{Clock, CounterKey, CounterStore, StoreError};
use crate::domain::policy::{FailureMode, RateLimitPolicy, RequestOutcome};
use crate::domain::request::RequestMeta;
use crate::domain::window::Decision;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Coordinates rate limiting decisions against a counter store.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    circuit_breaker: Arc<CircuitBreaker>,
    store_timeout: Duration,
}

impl RateLimiter {
    /// Create a new rate limiter.
    ///
    /// # Arguments
    /// * `store` - Counter store shared by every policy
    /// * `clock` - Time source for window alignment
    /// * `metrics` - Metrics tracker
    /// * `circuit_breaker` - Breaker guarding the counter store
    /// * `store_timeout` - Deadline for each store call
    pub fn new(
        store: Arc<dyn CounterStore>,
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

    /// Decide whether a request may proceed under `policy`.
    ///
    /// # Fail-Safe Behavior
    /// If the counter store errors, times out or is bypassed by the circuit
    /// breaker, the policy's [`FailureMode`] decides. The error is recorded
    /// and the decision is marked `degraded`.
    pub async fn check(&self, request: &RequestMeta, policy: &RateLimitPolicy) -> Decision {
        let window = policy.window_at(self.clock.now_ms());

        if policy.is_exempt(request) {
            debug!(policy = policy.name(), path = request.path(), "request exempt from rate limit");
            return Decision::exempt(policy, window);
        }

        let key = CounterKey::new(
            policy.shared_name(),
            KeyDeriver::rate_limit_key(policy, request),
        );

        let result = self
            .circuit_breaker
            .call(self.store_timeout, self.store.increment(&key, window))
            .await
            .map(|counter| Decision::from_increment(policy, counter));

        let decision = match result {
            Ok(decision) => decision,
            Err(error) => {
                self.metrics.record_rate_limit_error(policy.name());
                let allowed = policy.failure_mode() == FailureMode::Open;
                warn!(
                    policy = policy.name(),
                    key = %key.key,
                    error = %error,
                    admitted = allowed,
                    "counter store failed, applying failure mode"
                );
                Decision::degraded(policy, window, allowed)
            }
        };

        if decision.allowed {
            self.metrics.record_allowed(policy.name());
        } else {
            self.metrics.record_blocked(policy.name());
            if !decision.degraded {
                warn!(
                    policy = policy.name(),
                    key = %key.key,
                    total_hits = decision.total_hits,
                    limit = decision.limit,
                    "request throttled"
                );
            }
        }

        decision
    }

    /// Settle the slot taken by `check` once the request outcome is known.
    ///
    /// Refunds the slot when the policy skips this outcome. Does nothing for
    /// policies that count every request, for denied, exempt or degraded
    /// decisions, or once the decision's window has ended.
    pub async fn complete(
        &self,
        request: &RequestMeta,
        policy: &RateLimitPolicy,
        decision: &Decision,
        outcome: RequestOutcome,
    ) {
        if !policy.defers_counting()
            || !decision.allowed
            || decision.exempt
            || decision.degraded
            || policy.counts_outcome(outcome)
        {
            return;
        }

        let window = decision.window;
        if !window.contains(self.clock.now_ms()) {
            return;
        }
        let key = CounterKey::new(
            policy.shared_name(),
            KeyDeriver::rate_limit_key(policy, request),
        );

        if let Err(error) = self
            .circuit_breaker
            .call(self.store_timeout, self.store.decrement(&key, window))
            .await
        {
            self.metrics.record_rate_limit_error(policy.name());
            warn!(
                policy = policy.name(),
                key = %key.key,
                error = %error,
                "refund of skipped request failed"
            );
        }
    }

    /// Current time of the limiter's clock, in milliseconds.
    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    /// Get a reference to the metrics.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Get a reference to the circuit breaker.
    pub fn circuit_breaker(&self) -> &Arc<CircuitBreaker> {
        &self.circuit_breaker
    }

    /// Drop every counter and close the circuit.
    pub async fn reset(&self) -> Result<(), StoreError> {
        self.circuit_breaker.reset();
        self.store.reset().await
    }
}
