//! Integration tests for the Redis counter store.
//!
//! These tests require a Redis instance running at `redis://127.0.0.1/`.
//! Tests are ignored by default - run with `cargo test --features redis-storage --test redis_counter_store -- --ignored`

#![cfg(feature = "redis-storage")]

use request_governor::application::ports::{Clock, CounterKey, CounterStore};
use request_governor::{
    Governor, RateLimitPolicy, RedisCounterStore, RedisCounterStoreConfig, SystemClock, Window,
};
use std::sync::Arc;
use std::time::Duration;

const REDIS_URL: &str = "redis://127.0.0.1/";

/// Check if Redis is available before running tests
async fn redis_available() -> bool {
    RedisCounterStore::connect(REDIS_URL).await.is_ok()
}

/// Create a test store with a unique prefix
async fn create_test_store(test_name: &str) -> RedisCounterStore {
    let config = RedisCounterStoreConfig {
        key_prefix: format!("test:{}:", test_name),
        ..Default::default()
    };

    let store = RedisCounterStore::connect_with_config(REDIS_URL, config)
        .await
        .expect("Failed to connect to Redis");
    store.reset().await.expect("Failed to clear test keys");
    store
}

fn key(policy: &str, key: &str) -> CounterKey {
    CounterKey::new(Arc::from(policy), key)
}

fn current_window(window_ms: u64) -> Window {
    Window::aligned(SystemClock::new().now_ms(), window_ms)
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_increment_and_peek() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {REDIS_URL}");
        return;
    }

    let store = create_test_store("increment_and_peek").await;
    let window = current_window(60_000);
    let counter = key("search", "10.0.0.1:/api/search");

    assert_eq!(store.peek(&counter, window).await.unwrap().count, 0);
    assert_eq!(store.increment(&counter, window).await.unwrap().count, 1);
    assert_eq!(store.increment(&counter, window).await.unwrap().count, 2);
    assert_eq!(store.peek(&counter, window).await.unwrap().count, 2);

    store.reset().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_decrement_refunds_and_floors_at_zero() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {REDIS_URL}");
        return;
    }

    let store = create_test_store("decrement").await;
    let window = current_window(60_000);
    let counter = key("auth", "10.0.0.1:/api/auth/login");

    store.increment(&counter, window).await.unwrap();
    store.increment(&counter, window).await.unwrap();
    store.decrement(&counter, window).await.unwrap();
    assert_eq!(store.peek(&counter, window).await.unwrap().count, 1);

    store.decrement(&counter, window).await.unwrap();
    store.decrement(&counter, window).await.unwrap();
    assert_eq!(store.peek(&counter, window).await.unwrap().count, 0);

    // A missing counter is left missing
    let untouched = key("auth", "10.0.0.2:/api/auth/login");
    store.decrement(&untouched, window).await.unwrap();
    assert_eq!(store.increment(&untouched, window).await.unwrap().count, 1);

    store.reset().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_windows_and_policies_are_separate_keys() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {REDIS_URL}");
        return;
    }

    let store = create_test_store("separate_keys").await;
    let window = current_window(60_000);
    let next = Window::aligned(window.end_ms, 60_000);

    store.increment(&key("a", "k"), window).await.unwrap();
    assert_eq!(store.peek(&key("a", "k"), next).await.unwrap().count, 0);
    assert_eq!(store.peek(&key("b", "k"), window).await.unwrap().count, 0);

    store.reset().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_concurrent_increments_are_distinct() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {REDIS_URL}");
        return;
    }

    let store = create_test_store("concurrent").await;
    let window = current_window(60_000);

    let handles: Vec<_> = (0..50)
        .map(|_| {
            let store = store.clone();
            tokio::spawn(async move { store.increment(&key("a", "hot"), window).await.unwrap().count })
        })
        .collect();

    let mut counts = Vec::new();
    for handle in handles {
        counts.push(handle.await.unwrap());
    }
    counts.sort_unstable();
    assert_eq!(counts, (1..=50).collect::<Vec<_>>());

    store.reset().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_reset_only_touches_prefix() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {REDIS_URL}");
        return;
    }

    let mine = create_test_store("reset_mine").await;
    let theirs = create_test_store("reset_theirs").await;
    let window = current_window(60_000);

    mine.increment(&key("a", "k"), window).await.unwrap();
    theirs.increment(&key("a", "k"), window).await.unwrap();

    mine.reset().await.unwrap();
    assert_eq!(mine.peek(&key("a", "k"), window).await.unwrap().count, 0);
    assert_eq!(theirs.peek(&key("a", "k"), window).await.unwrap().count, 1);

    theirs.reset().await.unwrap();
}

#[tokio::test]
#[ignore] // Requires Redis
async fn test_instances_share_quota() {
    if !redis_available().await {
        eprintln!("Skipping test: Redis not available at {REDIS_URL}");
        return;
    }

    let store = create_test_store("shared_quota").await;
    let instance = |store: RedisCounterStore| {
        Governor::builder()
            .with_counter_store(Arc::new(store))
            .build()
            .unwrap()
    };
    let first = instance(store.clone());
    let second = instance(store.clone());

    let policy = RateLimitPolicy::new("shared", Duration::from_secs(60), 3).unwrap();
    let meta = request_governor::RequestMeta::new(http::Method::GET, "/api/search")
        .with_client_ip("10.0.0.9".parse().unwrap());

    let mut admitted = 0;
    for governor in [&first, &second, &first, &second, &first] {
        if governor.limiter().check(&meta, &policy).await.allowed {
            admitted += 1;
        }
    }
    // A window boundary during the loop can admit more
    assert!(admitted >= 3);

    store.reset().await.unwrap();
}
