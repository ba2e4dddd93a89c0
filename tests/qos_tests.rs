//! # QoS Integration Tests
//!
//! The circuit breaker sequence observed through the full gateway: timeout
//! counted as failure, short-circuiting without downstream calls while open,
//! and self-healing through the half-open trial.

mod common;

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::Router;
use serde_json::json;

use common::{spawn_downstream, spawn_gateway};

#[derive(Default)]
struct DownstreamState {
    hits: AtomicUsize,
    delay_ms: AtomicU64,
}

fn controllable_app(state: Arc<DownstreamState>) -> Router {
    async fn handler(State(state): State<Arc<DownstreamState>>) -> &'static str {
        state.hits.fetch_add(1, Ordering::SeqCst);
        let delay = state.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        "ok"
    }

    Router::new().fallback(handler).with_state(state)
}

#[tokio::test]
async fn breaker_opens_on_timeout_and_heals_through_half_open() {
    let state = Arc::new(DownstreamState::default());
    let downstream = spawn_downstream(controllable_app(Arc::clone(&state))).await;

    let gateway = spawn_gateway(json!({
        "routes": [{
            "key": "fragile",
            "upstreamPathTemplate": "/fragile",
            "downstreamPathTemplate": "/fragile",
            "downstreamHostAndPorts": [
                {"host": downstream.ip().to_string(), "port": downstream.port()}
            ],
            "qoSOptions": {
                "exceptionsAllowedBeforeBreaking": 1,
                "durationOfBreak": 1000,
                "timeoutValue": 500
            }
        }]
    }))
    .await;

    let client = reqwest::Client::new();

    // Request 1: fast downstream, passes through.
    let response = client.get(gateway.url("/fragile")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(state.hits.load(Ordering::SeqCst), 1);

    // Request 2: downstream delays past the QoS timeout; the call is cut off
    // and counted as a failure, opening the breaker.
    state.delay_ms.store(1000, Ordering::SeqCst);
    let started = Instant::now();
    let response = client.get(gateway.url("/fragile")).send().await.unwrap();
    assert_eq!(response.status(), 504);
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(500));
    assert!(elapsed < Duration::from_millis(950));
    assert_eq!(state.hits.load(Ordering::SeqCst), 2);

    // Requests 3 and 4: short-circuited with no downstream call.
    state.delay_ms.store(0, Ordering::SeqCst);
    for _ in 0..2 {
        let response = client.get(gateway.url("/fragile")).send().await.unwrap();
        assert_eq!(response.status(), 503);
    }
    assert_eq!(state.hits.load(Ordering::SeqCst), 2);

    // After the break duration the trial call is admitted; its success
    // closes the circuit again.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let response = client.get(gateway.url("/fragile")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(state.hits.load(Ordering::SeqCst), 3);

    let response = client.get(gateway.url("/fragile")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(state.hits.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn unreachable_downstream_is_not_breaker_counted() {
    let dead = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap()
    };

    let gateway = spawn_gateway(json!({
        "routes": [{
            "key": "refused",
            "upstreamPathTemplate": "/refused",
            "downstreamPathTemplate": "/refused",
            "downstreamHostAndPorts": [
                {"host": dead.ip().to_string(), "port": dead.port()}
            ],
            "qoSOptions": {
                "exceptionsAllowedBeforeBreaking": 1,
                "durationOfBreak": 60000,
                "timeoutValue": 2000
            }
        }]
    }))
    .await;

    let client = reqwest::Client::new();

    // If connection failures were breaker-counted, the second request would
    // be short-circuited with 503; both must surface as bad gateway.
    for _ in 0..2 {
        let response = client.get(gateway.url("/refused")).send().await.unwrap();
        assert_eq!(response.status(), 502);
    }
}

#[tokio::test]
async fn routes_without_qos_have_no_timeout_bound() {
    let state = Arc::new(DownstreamState::default());
    state.delay_ms.store(800, Ordering::SeqCst);
    let downstream = spawn_downstream(controllable_app(Arc::clone(&state))).await;

    let gateway = spawn_gateway(json!({
        "routes": [{
            "key": "patient",
            "upstreamPathTemplate": "/patient",
            "downstreamPathTemplate": "/patient",
            "downstreamHostAndPorts": [
                {"host": downstream.ip().to_string(), "port": downstream.port()}
            ]
        }]
    }))
    .await;

    let response = reqwest::get(gateway.url("/patient")).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
}
