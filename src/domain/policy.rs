//! Rate limiting policies for protected route classes.
//!
//! A [`RateLimitPolicy`] is an immutable, named description of how much
//! traffic a class of routes accepts: a fixed window length, a request
//! ceiling per window, the message returned to throttled callers and a few
//! optional strategies (custom key derivation, exemptions, deferred counting).
//!
//! Policies are validated at construction time. A policy that exists is
//! always usable at request time.

use crate::domain::request::RequestMeta;
use crate::domain::window::Window;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Derives a string key from a request.
///
/// Used for custom rate-limit keys and custom cache keys.
pub type KeyGenerator = Arc<dyn Fn(&RequestMeta) -> String + Send + Sync>;

/// Decides something about a request (exemption, cache bypass).
pub type RequestPredicate = Arc<dyn Fn(&RequestMeta) -> bool + Send + Sync>;

/// Message used when a policy does not override it.
pub const DEFAULT_MESSAGE: &str = "Too many requests, please try again later.";

/// Error returned when a policy or cache configuration is invalid.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyError {
    /// Policies are addressed by name, so the name must not be empty
    #[error("policy name must not be empty")]
    EmptyName,
    /// Window must be at least one millisecond long
    #[error("window duration must be at least 1ms")]
    ZeroWindow,
    /// Window length does not fit in a millisecond counter
    #[error("window duration {0:?} is too large")]
    WindowTooLarge(Duration),
    /// A ceiling of zero would deny every request
    #[error("max_requests must be greater than 0")]
    ZeroMaxRequests,
    /// Cached entries need a positive time-to-live
    #[error("cache ttl must be greater than 0")]
    ZeroTtl,
    /// Named instances must not share counters
    #[error("policy `{0}` is already registered")]
    DuplicateName(String),
}

/// What to do when a backing store cannot answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Treat the request as admitted (or the lookup as a miss)
    #[default]
    Open,
    /// Treat the request as denied (or the cache as unavailable)
    Closed,
}

/// Immutable rate limiting policy for one protected route class.
///
/// # Example
/// ```
/// use request_governor::{FailureMode, RateLimitPolicy};
/// use std::time::Duration;
///
/// let policy = RateLimitPolicy::new("search", Duration::from_secs(60), 30)
///     .unwrap()
///     .with_message("Slow down")
///     .with_failure_mode(FailureMode::Closed);
///
/// assert_eq!(policy.name(), "search");
/// assert_eq!(policy.window_ms(), 60_000);
/// assert_eq!(policy.max_requests(), 30);
/// ```
#[derive(Clone)]
pub struct RateLimitPolicy {
    name: Arc<str>,
    window_ms: u64,
    max_requests: u64,
    message: String,
    key_generator: Option<KeyGenerator>,
    skip: Option<RequestPredicate>,
    skip_successful_requests: bool,
    skip_failed_requests: bool,
    failure_mode: FailureMode,
}

impl RateLimitPolicy {
    /// Create a validated policy.
    ///
    /// # Errors
    /// Returns `PolicyError` if the name is empty, the window is shorter than
    /// one millisecond, or `max_requests` is zero.
    pub fn new(
        name: impl Into<String>,
        window: Duration,
        max_requests: u64,
    ) -> Result<Self, PolicyError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(PolicyError::EmptyName);
        }
        let window_ms =
            u64::try_from(window.as_millis()).map_err(|_| PolicyError::WindowTooLarge(window))?;
        if window_ms == 0 {
            return Err(PolicyError::ZeroWindow);
        }
        if max_requests == 0 {
            return Err(PolicyError::ZeroMaxRequests);
        }

        Ok(Self {
            name: Arc::from(name),
            window_ms,
            max_requests,
            message: DEFAULT_MESSAGE.to_string(),
            key_generator: None,
            skip: None,
            skip_successful_requests: false,
            skip_failed_requests: false,
            failure_mode: FailureMode::Open,
        })
    }

    /// Override the message returned to throttled callers.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// Derive the rate-limit key with a custom function instead of client IP + path.
    pub fn with_key_generator(
        mut self,
        generator: impl Fn(&RequestMeta) -> String + Send + Sync + 'static,
    ) -> Self {
        self.key_generator = Some(Arc::new(generator));
        self
    }

    /// Exempt matching requests from counting entirely.
    pub fn with_skip(
        mut self,
        predicate: impl Fn(&RequestMeta) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.skip = Some(Arc::new(predicate));
        self
    }

    /// Only count requests whose handler did not succeed.
    pub fn skip_successful_requests(mut self, skip: bool) -> Self {
        self.skip_successful_requests = skip;
        self
    }

    /// Only count requests whose handler succeeded.
    pub fn skip_failed_requests(mut self, skip: bool) -> Self {
        self.skip_failed_requests = skip;
        self
    }

    /// Choose fail-open or fail-closed behavior for counter store outages.
    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Policy name. Counters are scoped by it.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Shared handle to the policy name.
    pub fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    /// Window length in milliseconds.
    pub fn window_ms(&self) -> u64 {
        self.window_ms
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Maximum requests admitted per window.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Message returned to throttled callers.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Configured failure mode.
    pub fn failure_mode(&self) -> FailureMode {
        self.failure_mode
    }

    /// Custom key generator, if any.
    pub fn key_generator(&self) -> Option<&KeyGenerator> {
        self.key_generator.as_ref()
    }

    /// Whether the request is exempt from this policy.
    pub fn is_exempt(&self, request: &RequestMeta) -> bool {
        self.skip.as_ref().is_some_and(|skip| skip(request))
    }

    /// Whether the slot taken before the handler may be refunded afterwards.
    pub fn defers_counting(&self) -> bool {
        self.skip_successful_requests || self.skip_failed_requests
    }

    /// Whether a completed request with this outcome consumes quota.
    pub fn counts_outcome(&self, outcome: RequestOutcome) -> bool {
        match outcome {
            RequestOutcome::Succeeded => !self.skip_successful_requests,
            RequestOutcome::Failed => !self.skip_failed_requests,
        }
    }

    /// Aligned window containing `now_ms`.
    pub fn window_at(&self, now_ms: u64) -> Window {
        Window::aligned(now_ms, self.window_ms)
    }
}

impl fmt::Debug for RateLimitPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RateLimitPolicy")
            .field("name", &self.name)
            .field("window_ms", &self.window_ms)
            .field("max_requests", &self.max_requests)
            .field("message", &self.message)
            .field("custom_key", &self.key_generator.is_some())
            .field("has_skip", &self.skip.is_some())
            .field("skip_successful_requests", &self.skip_successful_requests)
            .field("skip_failed_requests", &self.skip_failed_requests)
            .field("failure_mode", &self.failure_mode)
            .finish()
    }
}

/// How a protected request ended, for deferred counting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Handler returned a response with a status below 400
    Succeeded,
    /// Handler errored or returned a 4xx/5xx response
    Failed,
}

impl RequestOutcome {
    /// Classify a response status.
    pub fn from_status(status: http::StatusCode) -> Self {
        if status.as_u16() < 400 {
            RequestOutcome::Succeeded
        } else {
            RequestOutcome::Failed
        }
    }
}

/// Named policies recognized by the application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyPreset {
    /// General anonymous traffic
    Public,
    /// Expensive query paths
    Search,
    /// Login/registration; only failed attempts count
    Auth,
    /// Authenticated write endpoints
    UserContent,
    /// Admin-role traffic
    Admin,
}

impl PolicyPreset {
    /// Every preset, in declaration order.
    pub const ALL: [PolicyPreset; 5] = [
        PolicyPreset::Public,
        PolicyPreset::Search,
        PolicyPreset::Auth,
        PolicyPreset::UserContent,
        PolicyPreset::Admin,
    ];

    /// Registry name of the preset.
    pub fn name(&self) -> &'static str {
        match self {
            PolicyPreset::Public => "PUBLIC",
            PolicyPreset::Search => "SEARCH",
            PolicyPreset::Auth => "AUTH",
            PolicyPreset::UserContent => "USER_CONTENT",
            PolicyPreset::Admin => "ADMIN",
        }
    }

    /// `(window, max_requests, message)` tuple of the preset.
    pub fn limits(&self) -> (Duration, u64, &'static str) {
        const FIFTEEN_MINUTES: Duration = Duration::from_secs(15 * 60);
        match self {
            PolicyPreset::Public => (
                FIFTEEN_MINUTES,
                1000,
                "Too many requests from this IP, please try again later.",
            ),
            PolicyPreset::Search => (
                Duration::from_secs(60),
                30,
                "Too many search requests, please slow down.",
            ),
            PolicyPreset::Auth => (
                FIFTEEN_MINUTES,
                5,
                "Too many authentication attempts, please try again later.",
            ),
            PolicyPreset::UserContent => (
                FIFTEEN_MINUTES,
                50,
                "Too many submissions, please try again later.",
            ),
            PolicyPreset::Admin => (
                FIFTEEN_MINUTES,
                300,
                "Too many admin requests, please try again later.",
            ),
        }
    }

    /// Build the policy for this preset.
    pub fn policy(&self) -> RateLimitPolicy {
        let (window, max_requests, message) = self.limits();
        let policy = RateLimitPolicy {
            name: Arc::from(self.name()),
            window_ms: u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
            max_requests,
            message: message.to_string(),
            key_generator: None,
            skip: None,
            skip_successful_requests: false,
            skip_failed_requests: false,
            failure_mode: FailureMode::Open,
        };

        match self {
            // Credential guessing: count only failures and refuse service when blind.
            PolicyPreset::Auth => policy
                .skip_successful_requests(true)
                .with_failure_mode(FailureMode::Closed),
            _ => policy,
        }
    }
}
