//! Policies that count requests by outcome.

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use request_governor::infrastructure::mocks::{FailingCounterStore, MockClock};
use request_governor::{
    BoxError, Governor, Handler, PolicyPreset, RateLimitPolicy, RateLimited,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Accepts the password `hunter2`, rejects anything else with 401.
async fn login(request: Request<Bytes>) -> Result<Response<Bytes>, BoxError> {
    let status = if request.body().as_ref() == b"hunter2" {
        StatusCode::OK
    } else {
        StatusCode::UNAUTHORIZED
    };
    let mut response = Response::new(Bytes::new());
    *response.status_mut() = status;
    Ok(response)
}

fn attempt(password: &'static str) -> Request<Bytes> {
    Request::post("/api/auth/login")
        .header("x-forwarded-for", "192.0.2.10")
        .body(Bytes::from_static(password.as_bytes()))
        .unwrap()
}

fn auth_handler(clock: &MockClock) -> (Governor, RateLimited<impl Handler>) {
    let governor = Governor::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_presets()
        .build()
        .unwrap();
    let policy = governor.preset(PolicyPreset::Auth).unwrap();
    let handler = governor.with_rate_limit(login, policy);
    (governor, handler)
}

#[tokio::test]
async fn test_successful_logins_are_free() {
    let clock = MockClock::new(0);
    let (_governor, handler) = auth_handler(&clock);

    for _ in 0..20 {
        let response = handler.call(attempt("hunter2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}

#[tokio::test]
async fn test_failed_logins_exhaust_quota() {
    let clock = MockClock::new(0);
    let (governor, handler) = auth_handler(&clock);

    for _ in 0..5 {
        let response = handler.call(attempt("guess")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    // Even the right password is refused now
    let response = handler.call(attempt("hunter2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
    assert_eq!(
        body["message"],
        "Too many authentication attempts, please try again later."
    );

    let snapshot = governor.metrics().snapshot();
    assert_eq!(snapshot.rate_limit_allowed, 5);
    assert_eq!(snapshot.rate_limit_blocked, 1);

    clock.advance(Duration::from_secs(15 * 60));
    let response = handler.call(attempt("hunter2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_remaining_reflects_the_pending_request() {
    let clock = MockClock::new(0);
    let (_governor, handler) = auth_handler(&clock);

    let first = handler.call(attempt("guess")).await.unwrap();
    assert_eq!(first.headers()["ratelimit-remaining"], "4");

    let second = handler.call(attempt("hunter2")).await.unwrap();
    assert_eq!(second.headers()["ratelimit-remaining"], "3");

    // The success was not counted
    let third = handler.call(attempt("guess")).await.unwrap();
    assert_eq!(third.headers()["ratelimit-remaining"], "3");
}

#[tokio::test]
async fn test_handler_errors_count_as_failures() {
    let clock = MockClock::new(0);
    let governor = Governor::builder()
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    let policy = RateLimitPolicy::new("flaky", Duration::from_secs(60), 2)
        .unwrap()
        .skip_successful_requests(true);
    let handler = governor.with_rate_limit(
        |_req: Request<Bytes>| async { Err::<Response<Bytes>, BoxError>("upstream reset".into()) },
        policy,
    );

    assert!(handler.call(attempt("x")).await.is_err());
    assert!(handler.call(attempt("x")).await.is_err());
    let response = handler.call(attempt("x")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_skip_failed_counts_only_successes() {
    let clock = MockClock::new(0);
    let governor = Governor::builder()
        .with_clock(Arc::new(clock.clone()))
        .build()
        .unwrap();
    let policy = RateLimitPolicy::new("exports", Duration::from_secs(60), 2)
        .unwrap()
        .skip_failed_requests(true);
    let handler = governor.with_rate_limit(login, policy);

    for _ in 0..10 {
        assert_eq!(
            handler.call(attempt("guess")).await.unwrap().status(),
            StatusCode::UNAUTHORIZED
        );
    }
    handler.call(attempt("hunter2")).await.unwrap();
    handler.call(attempt("hunter2")).await.unwrap();
    assert_eq!(
        handler.call(attempt("hunter2")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_auth_fails_closed_without_store() {
    let clock = MockClock::new(0);
    let store = FailingCounterStore::new();
    let governor = Governor::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_counter_store(Arc::new(store.clone()))
        .with_presets()
        .build()
        .unwrap();
    let handler = governor.with_rate_limit(login, governor.preset(PolicyPreset::Auth).unwrap());

    store.fail(true);
    let response = handler.call(attempt("hunter2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(governor.metrics().rate_limit_errors(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_guesses_cannot_exceed_quota() {
    let clock = MockClock::new(0);
    let governor = Governor::builder()
        .with_clock(Arc::new(clock.clone()))
        .with_presets()
        .build()
        .unwrap();
    let policy = governor.preset(PolicyPreset::Auth).unwrap();

    let reached = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&reached);
    let handler = Arc::new(governor.with_rate_limit(
        move |_req: Request<Bytes>| {
            let seen = Arc::clone(&seen);
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;
                let mut response = Response::new(Bytes::new());
                *response.status_mut() = StatusCode::UNAUTHORIZED;
                Ok::<_, BoxError>(response)
            }
        },
        policy,
    ));

    let handles: Vec<_> = (0..100)
        .map(|_| {
            let handler = Arc::clone(&handler);
            tokio::spawn(async move { handler.call(attempt("guess")).await.unwrap().status() })
        })
        .collect();

    let mut throttled = 0;
    for handle in handles {
        if handle.await.unwrap() == StatusCode::TOO_MANY_REQUESTS {
            throttled += 1;
        }
    }

    assert_eq!(reached.load(Ordering::SeqCst), 5);
    assert_eq!(throttled, 95);
    assert_eq!(
        handler.call(attempt("hunter2")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}

#[tokio::test]
async fn test_refunded_successes_free_their_slot() {
    let clock = MockClock::new(0);
    let (_governor, handler) = auth_handler(&clock);

    for _ in 0..4 {
        handler.call(attempt("guess")).await.unwrap();
    }
    // Only one slot left; successes keep handing it back
    for _ in 0..10 {
        let response = handler.call(attempt("hunter2")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()["ratelimit-remaining"], "0");
    }
    assert_eq!(
        handler.call(attempt("guess")).await.unwrap().status(),
        StatusCode::UNAUTHORIZED
    );
    assert_eq!(
        handler.call(attempt("guess")).await.unwrap().status(),
        StatusCode::TOO_MANY_REQUESTS
    );
}
