//! Redis-backed counter store.
//!
//! Shares rate limit counters across application instances.
//!
//! ## Architecture
//!
//! One Redis key per `(policy, key, window)`:
//! - Key: `{prefix}{policy_len}:{policy}:{key}:{window_start_ms}`
//! - Value: request count, incremented with `INCR`
//! - Expiry: `PEXPIREAT` at the window end plus a grace period
//!
//! The policy name is length-prefixed because both policy names and derived
//! keys may contain `:` (`ip:path` keys, IPv6 addresses).
//!
//! `INCR` and `PEXPIREAT` run in one `MULTI`/`EXEC` pipeline, so every
//! increment observes a distinct count and no counter outlives its window
//! without an expiry. Windows are aligned to the Unix epoch, so instances
//! with synchronized clocks share windows.
//!
//! ## Example
//!
//! ```rust,ignore
//! use request_governor::{Governor, RedisCounterStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisCounterStore::connect("redis://127.0.0.1/")
//!         .await
//!         .expect("Failed to connect to Redis");
//!
//!     let governor = Governor::builder()
//!         .with_counter_store(Arc::new(store))
//!         .with_presets()
//!         .build()
//!         .unwrap();
//! }
//! ```

use crate::application::ports::{CounterKey, CounterStore, StoreError};
use crate::domain::window::{Window, WindowCounter};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, RedisError};
use std::fmt;
use std::time::Duration;
use tracing::debug;

/// Keys deleted per `DEL` during a reset.
const RESET_BATCH: usize = 100;

/// Decrement a counter that still exists, never below zero.
const DECREMENT_SCRIPT: &str = r#"
local count = tonumber(redis.call('GET', KEYS[1]) or '0')
if count > 0 then
    return redis.call('DECR', KEYS[1])
end
return 0
"#;

/// Configuration for the Redis counter store.
#[derive(Debug, Clone)]
pub struct RedisCounterStoreConfig {
    /// Key prefix for Redis keys (default: "request-governor:")
    pub key_prefix: String,
    /// Extra lifetime after the window ends, absorbing clock skew (default: 1s)
    pub expiry_grace: Duration,
}

impl Default for RedisCounterStoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: "request-governor:".to_string(),
            expiry_grace: Duration::from_secs(1),
        }
    }
}

/// Redis-backed counter store for distributed rate limiting.
///
/// Cloning shares the underlying multiplexed connection.
#[derive(Clone)]
pub struct RedisCounterStore {
    connection: ConnectionManager,
    config: RedisCounterStoreConfig,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RedisCounterStore {
    /// Connect to Redis with default configuration.
    ///
    /// # Arguments
    /// * `url` - Redis connection URL (e.g., "redis://127.0.0.1/")
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect(url: &str) -> Result<Self, RedisError> {
        Self::connect_with_config(url, RedisCounterStoreConfig::default()).await
    }

    /// Connect to Redis with custom configuration.
    ///
    /// # Errors
    /// Returns error if connection fails.
    pub async fn connect_with_config(
        url: &str,
        config: RedisCounterStoreConfig,
    ) -> Result<Self, RedisError> {
        let client = Client::open(url)?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection, config })
    }

    /// Get the configuration.
    pub fn config(&self) -> &RedisCounterStoreConfig {
        &self.config
    }

    /// Redis key of a counter in a window.
    pub fn redis_key(&self, key: &CounterKey, window: Window) -> String {
        counter_key_name(&self.config.key_prefix, key, window)
    }

    fn expires_at_ms(&self, window: Window) -> u64 {
        let grace_ms = u64::try_from(self.config.expiry_grace.as_millis()).unwrap_or(u64::MAX);
        window.end_ms.saturating_add(grace_ms)
    }
}

fn counter_key_name(prefix: &str, key: &CounterKey, window: Window) -> String {
    format!(
        "{}{}:{}:{}:{}",
        prefix,
        key.policy.len(),
        key.policy,
        key.key,
        window.start_ms
    )
}

fn unavailable(error: RedisError) -> StoreError {
    StoreError::Unavailable(error.to_string())
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &CounterKey,
        window: Window,
    ) -> Result<WindowCounter, StoreError> {
        let redis_key = self.redis_key(key, window);
        let mut conn = self.connection.clone();

        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(&redis_key)
            .cmd("PEXPIREAT")
            .arg(&redis_key)
            .arg(self.expires_at_ms(window))
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(WindowCounter { count, window })
    }

    async fn decrement(&self, key: &CounterKey, window: Window) -> Result<(), StoreError> {
        let redis_key = self.redis_key(key, window);
        let mut conn = self.connection.clone();

        let _: i64 = redis::Script::new(DECREMENT_SCRIPT)
            .key(&redis_key)
            .invoke_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(())
    }

    async fn peek(&self, key: &CounterKey, window: Window) -> Result<WindowCounter, StoreError> {
        let redis_key = self.redis_key(key, window);
        let mut conn = self.connection.clone();

        let count: Option<u64> = redis::cmd("GET")
            .arg(&redis_key)
            .query_async(&mut conn)
            .await
            .map_err(unavailable)?;

        Ok(WindowCounter {
            count: count.unwrap_or(0),
            window,
        })
    }

    async fn reset(&self) -> Result<(), StoreError> {
        let pattern = format!("{}*", self.config.key_prefix);
        let mut conn = self.connection.clone();
        let mut cursor: u64 = 0;
        let mut deleted = 0usize;

        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(RESET_BATCH)
                .query_async(&mut conn)
                .await
                .map_err(unavailable)?;

            if !keys.is_empty() {
                let removed: usize = redis::cmd("DEL")
                    .arg(&keys)
                    .query_async(&mut conn)
                    .await
                    .map_err(unavailable)?;
                deleted += removed;
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        debug!(deleted, prefix = %self.config.key_prefix, "redis counters reset");
        Ok(())
    }
}
