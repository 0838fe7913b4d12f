//! Fixed, aligned time windows and admission decisions.
//!
//! Time is divided into non-overlapping windows of `window_ms` aligned to
//! the clock epoch: `start = floor(now / window_ms) * window_ms`. Every
//! caller arriving inside the same interval shares one counter, no matter
//! when inside the interval it arrived. Up to twice the nominal rate can
//! pass across a boundary.

use crate::domain::policy::RateLimitPolicy;

/// A fixed window `[start_ms, end_ms)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    /// Inclusive start, milliseconds since the clock epoch
    pub start_ms: u64,
    /// Exclusive end, milliseconds since the clock epoch
    pub end_ms: u64,
}

impl Window {
    /// The aligned window containing `now_ms`.
    ///
    /// `window_ms` must be non-zero; policies guarantee this.
    ///
    /// # Example
    /// ```
    /// use request_governor::Window;
    ///
    /// let window = Window::aligned(125_000, 60_000);
    /// assert_eq!(window.start_ms, 120_000);
    /// assert_eq!(window.end_ms, 180_000);
    /// ```
    pub fn aligned(now_ms: u64, window_ms: u64) -> Self {
        let start_ms = (now_ms / window_ms) * window_ms;
        Self {
            start_ms,
            end_ms: start_ms.saturating_add(window_ms),
        }
    }

    /// Whether `now_ms` falls inside this window.
    pub fn contains(&self, now_ms: u64) -> bool {
        now_ms >= self.start_ms && now_ms < self.end_ms
    }

    /// Whole seconds until the window ends, rounded up.
    pub fn seconds_until_end(&self, now_ms: u64) -> u64 {
        self.end_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}

/// Request count for one `(policy, key)` pair in one window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCounter {
    /// Requests counted in the window
    pub count: u64,
    /// Window the count belongs to
    pub window: Window,
}

impl WindowCounter {
    /// A fresh, empty counter for a window.
    pub fn new(window: Window) -> Self {
        Self { count: 0, window }
    }

    /// Whether the counter's window has ended.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms >= self.window.end_ms
    }
}

/// Outcome of a rate limit check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Ceiling of the policy
    pub limit: u64,
    /// Requests left in the current window
    pub remaining: u64,
    /// When the current window ends, milliseconds since the clock epoch
    pub reset_time_ms: u64,
    /// Requests counted in the current window
    pub total_hits: u64,
    /// Request matched the policy's exemption predicate and was not counted
    pub exempt: bool,
    /// Counter store could not answer; the failure mode decided
    pub degraded: bool,
    /// Window the request was counted in
    pub window: Window,
}

impl Decision {
    /// Decision for a request whose increment produced `counter`.
    ///
    /// Each concurrent increment observes a distinct post-increment count,
    /// so exactly `max_requests` requests see `count <= max_requests`.
    pub fn from_increment(policy: &RateLimitPolicy, counter: WindowCounter) -> Self {
        let limit = policy.max_requests();
        Self {
            allowed: counter.count <= limit,
            limit,
            remaining: limit.saturating_sub(counter.count),
            reset_time_ms: counter.window.end_ms,
            total_hits: counter.count,
            exempt: false,
            degraded: false,
            window: counter.window,
        }
    }

    /// Decision for an exempt request.
    pub fn exempt(policy: &RateLimitPolicy, window: Window) -> Self {
        Self {
            allowed: true,
            limit: policy.max_requests(),
            remaining: policy.max_requests(),
            reset_time_ms: window.end_ms,
            total_hits: 0,
            exempt: true,
            degraded: false,
            window,
        }
    }

    /// Decision taken without the counter store.
    pub fn degraded(policy: &RateLimitPolicy, window: Window, allowed: bool) -> Self {
        Self {
            allowed,
            limit: policy.max_requests(),
            remaining: if allowed { policy.max_requests() } else { 0 },
            reset_time_ms: window.end_ms,
            total_hits: 0,
            exempt: false,
            degraded: true,
            window,
        }
    }

    /// Whole seconds until the quota resets, rounded up.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        self.reset_time_ms.saturating_sub(now_ms).div_ceil(1000)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn policy(max: u64) -> RateLimitPolicy {
        RateLimitPolicy::new("test", Duration::from_secs(60), max).unwrap()
    }

    #[test]
    fn test_alignment() {
        assert_eq!(
            Window::aligned(0, 60_000),
            Window {
                start_ms: 0,
                end_ms: 60_000
            }
        );
        assert_eq!(Window::aligned(59_999, 60_000).start_ms, 0);
        assert_eq!(Window::aligned(60_000, 60_000).start_ms, 60_000);
        assert_eq!(Window::aligned(60_001, 60_000).start_ms, 60_000);
    }

    #[test]
    fn test_contains_is_half_open() {
        let window = Window::aligned(1_000, 1_000);
        assert!(window.contains(1_000));
        assert!(window.contains(1_999));
        assert!(!window.contains(2_000));
        assert!(!window.contains(999));
    }

    #[test]
    fn test_seconds_until_end_rounds_up() {
        let window = Window::aligned(0, 60_000);
        assert_eq!(window.seconds_until_end(0), 60);
        assert_eq!(window.seconds_until_end(59_001), 1);
        assert_eq!(window.seconds_until_end(59_999), 1);
        assert_eq!(window.seconds_until_end(60_000), 0);
    }

    #[test]
    fn test_counter_expiry() {
        let counter = WindowCounter::new(Window::aligned(0, 1_000));
        assert!(!counter.is_expired(999));
        assert!(counter.is_expired(1_000));
    }

    #[test]
    fn test_decision_from_increment() {
        let policy = policy(5);
        let window = Window::aligned(0, 60_000);

        let at_limit = Decision::from_increment(&policy, WindowCounter { count: 5, window });
        assert!(at_limit.allowed);
        assert_eq!(at_limit.remaining, 0);

        let over = Decision::from_increment(&policy, WindowCounter { count: 6, window });
        assert!(!over.allowed);
        assert_eq!(over.remaining, 0);
        assert_eq!(over.total_hits, 6);
        assert_eq!(over.reset_time_ms, 60_000);
    }

    #[test]
    fn test_retry_after() {
        let policy = policy(1);
        let window = Window::aligned(0, 60_000);
        let decision = Decision::from_increment(&policy, WindowCounter { count: 2, window });
        assert_eq!(decision.retry_after_secs(30_500), 30);
    }
}
