//! Observability metrics for request governance.
//!
//! Counts cache hits, misses and errors, and rate limit admissions, denials
//! and store errors. Counters are owned by an explicitly constructed
//! [`Metrics`] instance (cloning shares it) and can be reset between tests.

use crate::telemetry;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Metrics tracking governance statistics.
///
/// All metrics use atomic operations for thread-safe updates and reads.
/// Each recorded event is also mirrored to the `metrics` facade.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Lookups answered from the cache
    cache_hits: AtomicU64,
    /// Lookups that invoked the handler
    cache_misses: AtomicU64,
    /// Handler failures and cache store failures on the cache path
    cache_errors: AtomicU64,
    /// Requests admitted by a rate limit check
    rate_limit_allowed: AtomicU64,
    /// Requests denied by a rate limit check
    rate_limit_blocked: AtomicU64,
    /// Counter store failures
    rate_limit_errors: AtomicU64,
}

impl Metrics {
    /// Create a new metrics tracker.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                cache_hits: AtomicU64::new(0),
                cache_misses: AtomicU64::new(0),
                cache_errors: AtomicU64::new(0),
                rate_limit_allowed: AtomicU64::new(0),
                rate_limit_blocked: AtomicU64::new(0),
                rate_limit_errors: AtomicU64::new(0),
            }),
        }
    }

    pub(crate) fn record_cache_hit(&self) {
        self.inner.cache_hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_HITS_TOTAL).increment(1);
    }

    pub(crate) fn record_cache_miss(&self) {
        self.inner.cache_misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
    }

    pub(crate) fn record_cache_error(&self) {
        self.inner.cache_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::CACHE_ERRORS_TOTAL).increment(1);
    }

    pub(crate) fn record_invalidated(&self, removed: usize) {
        metrics::counter!(telemetry::CACHE_INVALIDATED_TOTAL).increment(removed as u64);
    }

    pub(crate) fn record_allowed(&self, policy: &str) {
        self.inner.rate_limit_allowed.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::RATE_LIMIT_ALLOWED_TOTAL, "policy" => policy.to_string())
            .increment(1);
    }

    pub(crate) fn record_blocked(&self, policy: &str) {
        self.inner.rate_limit_blocked.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::RATE_LIMIT_BLOCKED_TOTAL, "policy" => policy.to_string())
            .increment(1);
    }

    pub(crate) fn record_rate_limit_error(&self, policy: &str) {
        self.inner.rate_limit_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(telemetry::RATE_LIMIT_ERRORS_TOTAL, "policy" => policy.to_string())
            .increment(1);
    }

    /// Get the total number of cache hits.
    pub fn cache_hits(&self) -> u64 {
        self.inner.cache_hits.load(Ordering::Relaxed)
    }

    /// Get the total number of cache misses.
    pub fn cache_misses(&self) -> u64 {
        self.inner.cache_misses.load(Ordering::Relaxed)
    }

    /// Get the total number of cache path errors.
    pub fn cache_errors(&self) -> u64 {
        self.inner.cache_errors.load(Ordering::Relaxed)
    }

    /// Get the total number of admitted requests.
    pub fn rate_limit_allowed(&self) -> u64 {
        self.inner.rate_limit_allowed.load(Ordering::Relaxed)
    }

    /// Get the total number of denied requests.
    pub fn rate_limit_blocked(&self) -> u64 {
        self.inner.rate_limit_blocked.load(Ordering::Relaxed)
    }

    /// Get the total number of counter store failures.
    pub fn rate_limit_errors(&self) -> u64 {
        self.inner.rate_limit_errors.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all metrics.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cache_hits: self.cache_hits(),
            cache_misses: self.cache_misses(),
            cache_errors: self.cache_errors(),
            rate_limit_allowed: self.rate_limit_allowed(),
            rate_limit_blocked: self.rate_limit_blocked(),
            rate_limit_errors: self.rate_limit_errors(),
        }
    }

    /// Reset all metrics to zero.
    ///
    /// Facade counters already emitted are not affected.
    pub fn reset(&self) {
        self.inner.cache_hits.store(0, Ordering::Relaxed);
        self.inner.cache_misses.store(0, Ordering::Relaxed);
        self.inner.cache_errors.store(0, Ordering::Relaxed);
        self.inner.rate_limit_allowed.store(0, Ordering::Relaxed);
        self.inner.rate_limit_blocked.store(0, Ordering::Relaxed);
        self.inner.rate_limit_errors.store(0, Ordering::Relaxed);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    /// Lookups answered from the cache
    pub cache_hits: u64,
    /// Lookups that invoked the handler
    pub cache_misses: u64,
    /// Handler failures and cache store failures on the cache path
    pub cache_errors: u64,
    /// Requests admitted by a rate limit check
    pub rate_limit_allowed: u64,
    /// Requests denied by a rate limit check
    pub rate_limit_blocked: u64,
    /// Counter store failures
    pub rate_limit_errors: u64,
}

impl MetricsSnapshot {
    /// Fraction of completed lookups served from cache (0.0 to 1.0).
    ///
    /// Returns 0.0 if no lookup has completed.
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_lookups();
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }

    /// Fraction of rate limit checks that were denied (0.0 to 1.0).
    ///
    /// Returns 0.0 if no check has been made.
    pub fn block_rate(&self) -> f64 {
        let total = self.total_checks();
        if total == 0 {
            0.0
        } else {
            self.rate_limit_blocked as f64 / total as f64
        }
    }

    /// Hits plus misses.
    pub fn total_lookups(&self) -> u64 {
        self.cache_hits.saturating_add(self.cache_misses)
    }

    /// Allowed plus blocked.
    pub fn total_checks(&self) -> u64 {
        self.rate_limit_allowed
            .saturating_add(self.rate_limit_blocked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initial_state() {
        let snapshot = Metrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.hit_rate(), 0.0);
        assert_eq!(snapshot.block_rate(), 0.0);
    }

    #[test]
    fn test_cache_counters() {
        let metrics = Metrics::new();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_hit();
        metrics.record_cache_miss();
        metrics.record_cache_error();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cache_hits, 3);
        assert_eq!(snapshot.cache_misses, 1);
        assert_eq!(snapshot.cache_errors, 1);
        assert_eq!(snapshot.total_lookups(), 4);
        assert_eq!(snapshot.hit_rate(), 0.75);
    }

    #[test]
    fn test_rate_limit_counters() {
        let metrics = Metrics::new();
        metrics.record_allowed("SEARCH");
        metrics.record_blocked("SEARCH");
        metrics.record_blocked("AUTH");
        metrics.record_rate_limit_error("AUTH");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rate_limit_allowed, 1);
        assert_eq!(snapshot.rate_limit_blocked, 2);
        assert_eq!(snapshot.rate_limit_errors, 1);
        assert_eq!(snapshot.total_checks(), 3);
        assert!((snapshot.block_rate() - 2.0 / 3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = Metrics::new();
        let clone = metrics.clone();
        clone.record_cache_hit();
        assert_eq!(metrics.cache_hits(), 1);
    }

    #[test]
    fn test_reset() {
        let metrics = Metrics::new();
        metrics.record_cache_hit();
        metrics.record_allowed("PUBLIC");
        metrics.record_rate_limit_error("PUBLIC");

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_concurrent_updates() {
        use std::thread;

        let metrics = Metrics::new();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let metrics = metrics.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        metrics.record_cache_miss();
                        metrics.record_allowed("PUBLIC");
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.cache_misses(), 8000);
        assert_eq!(metrics.rate_limit_allowed(), 8000);
    }
}
