//! Declarative configuration.
//!
//! Governance settings can be loaded from TOML instead of being assembled
//! in code:
//!
//! ```toml
//! include_presets = true
//! store_timeout_ms = 50
//!
//! [policies.uploads]
//! window_ms = 60000
//! max_requests = 10
//! message = "Upload quota exceeded."
//! failure_mode = "closed"
//!
//! [cache]
//! default_ttl_secs = 300
//! max_entries = 10000
//! ```
//!
//! Validation happens when the configuration is turned into policies and a
//! builder, never at request time.

use crate::application::cache::CacheOptions;
use crate::application::circuit_breaker::CircuitBreakerConfig;
use crate::domain::policy::{FailureMode, PolicyError, RateLimitPolicy};
use crate::infrastructure::cache_store::ShardedCacheStore;
use crate::infrastructure::middleware::{Governor, GovernorBuilder};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error returned when loading or validating configuration fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// File that failed to load
        path: PathBuf,
        /// Underlying error
        source: std::io::Error,
    },
    /// The document is not valid TOML for this schema
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    /// A policy failed validation
    #[error("invalid policy `{name}`: {source}")]
    Policy {
        /// Policy name as written in the file
        name: String,
        /// Validation error
        source: PolicyError,
    },
    /// Cache settings failed validation
    #[error("invalid cache settings: {0}")]
    Cache(PolicyError),
}

/// Top-level governance configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GovernanceConfig {
    /// Register the built-in presets before the configured policies
    #[serde(default)]
    pub include_presets: bool,
    /// Deadline for store calls, in milliseconds (default: 100)
    #[serde(default = "default_store_timeout_ms")]
    pub store_timeout_ms: u64,
    /// Named policies
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyConfig>,
    /// Response cache settings
    #[serde(default)]
    pub cache: CacheConfig,
    /// Store circuit breaker settings
    #[serde(default)]
    pub circuit_breaker: BreakerConfig,
}

fn default_store_timeout_ms() -> u64 {
    100
}

/// One named rate limiting policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Window length in milliseconds
    pub window_ms: u64,
    /// Requests admitted per window
    pub max_requests: u64,
    /// Message returned to throttled callers
    #[serde(default)]
    pub message: Option<String>,
    /// Count only requests that did not succeed
    #[serde(default)]
    pub skip_successful_requests: bool,
    /// Count only requests that succeeded
    #[serde(default)]
    pub skip_failed_requests: bool,
    /// Behavior when the counter store is unavailable
    #[serde(default)]
    pub failure_mode: FailureMode,
}

/// Response cache settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// TTL of cached responses in seconds (default: 300)
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
    /// Maximum number of cached responses (default: unbounded)
    #[serde(default)]
    pub max_entries: Option<usize>,
    /// Behavior when the cache store is unavailable
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: default_ttl_secs(),
            max_entries: None,
            failure_mode: FailureMode::Open,
        }
    }
}

fn default_ttl_secs() -> u64 {
    300
}

/// Store circuit breaker settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BreakerConfig {
    /// Consecutive failures before the breaker opens (default: 5)
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds before a half-open retry (default: 30)
    #[serde(default = "default_recovery_secs")]
    pub recovery_timeout_secs: u64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: default_failure_threshold(),
            recovery_timeout_secs: default_recovery_secs(),
        }
    }
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_secs() -> u64 {
    30
}

impl GovernanceConfig {
    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `ConfigError::Parse` if the document does not match the schema.
    pub fn from_toml(source: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(source)?)
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&source)
    }

    /// Validate and build the configured policies, sorted by name.
    ///
    /// # Errors
    /// Returns `ConfigError::Policy` for the first invalid policy.
    pub fn policies(&self) -> Result<Vec<RateLimitPolicy>, ConfigError> {
        self.policies
            .iter()
            .map(|(name, config)| {
                config
                    .to_policy(name)
                    .map_err(|source| ConfigError::Policy {
                        name: name.clone(),
                        source,
                    })
            })
            .collect()
    }

    /// Default cache options for wrapped handlers.
    ///
    /// # Errors
    /// Returns `ConfigError::Cache` if the TTL is zero.
    pub fn cache_options(&self) -> Result<CacheOptions, ConfigError> {
        CacheOptions::new(Duration::from_secs(self.cache.default_ttl_secs))
            .map(|options| options.with_failure_mode(self.cache.failure_mode))
            .map_err(ConfigError::Cache)
    }

    /// In-process cache store honoring `max_entries`.
    pub fn cache_store(&self) -> ShardedCacheStore {
        match self.cache.max_entries {
            Some(max_entries) => ShardedCacheStore::new().with_max_entries(max_entries),
            None => ShardedCacheStore::new(),
        }
    }

    /// Governor builder preloaded with this configuration.
    ///
    /// Clock and counter store can still be overridden on the returned
    /// builder. Duplicate names and zero timeouts are reported by `build()`.
    ///
    /// # Errors
    /// Returns `ConfigError` if a policy is invalid.
    pub fn builder(&self) -> Result<GovernorBuilder, ConfigError> {
        let mut builder = Governor::builder()
            .with_store_timeout(Duration::from_millis(self.store_timeout_ms))
            .with_breaker_config(CircuitBreakerConfig {
                failure_threshold: self.circuit_breaker.failure_threshold,
                recovery_timeout: Duration::from_secs(self.circuit_breaker.recovery_timeout_secs),
            })
            .with_cache_store(Arc::new(self.cache_store()));

        if self.include_presets {
            builder = builder.with_presets();
        }
        for policy in self.policies()? {
            builder = builder.with_policy(policy);
        }
        Ok(builder)
    }
}

impl PolicyConfig {
    /// Validate into a named policy.
    ///
    /// # Errors
    /// Returns `PolicyError` if the window, limit or name is invalid.
    pub fn to_policy(&self, name: &str) -> Result<RateLimitPolicy, PolicyError> {
        let mut policy =
            RateLimitPolicy::new(name, Duration::from_millis(self.window_ms), self.max_requests)?
                .skip_successful_requests(self.skip_successful_requests)
                .skip_failed_requests(self.skip_failed_requests)
                .with_failure_mode(self.failure_mode);

        if let Some(message) = &self.message {
            policy = policy.with_message(message.clone());
        }
        Ok(policy)
    }
}
