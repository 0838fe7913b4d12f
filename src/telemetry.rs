//! Telemetry metric name constants.
//!
//! Every increment of the in-process [`Metrics`](crate::Metrics) counters is
//! mirrored to the `metrics` crate facade under the names below. Consumers
//! install their own recorder (prometheus, statsd, ...); without one, all
//! facade calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `request_governor_`. Counters end in
//! `_total`.
//!
//! # Common labels
//!
//! - `policy` — rate limit policy name (e.g. "SEARCH", "AUTH")

/// Total cache lookups served from the store.
pub const CACHE_HITS_TOTAL: &str = "request_governor_cache_hits_total";

/// Total cache lookups that fell through to the handler.
pub const CACHE_MISSES_TOTAL: &str = "request_governor_cache_misses_total";

/// Total cache path failures: handler errors and cache store errors.
pub const CACHE_ERRORS_TOTAL: &str = "request_governor_cache_errors_total";

/// Total requests admitted by a rate limit check.
///
/// Labels: `policy`.
pub const RATE_LIMIT_ALLOWED_TOTAL: &str = "request_governor_rate_limit_allowed_total";

/// Total requests denied by a rate limit check.
///
/// Labels: `policy`.
pub const RATE_LIMIT_BLOCKED_TOTAL: &str = "request_governor_rate_limit_blocked_total";

/// Total counter store failures (errors, timeouts, open circuit).
///
/// Labels: `policy`.
pub const RATE_LIMIT_ERRORS_TOTAL: &str = "request_governor_rate_limit_errors_total";

/// Total cache entries removed by tag invalidation.
pub const CACHE_INVALIDATED_TOTAL: &str = "request_governor_cache_invalidated_total";
