//! Integration tests for API endpoints
//!
//! These tests verify that:
//! - Every route requires the shared secret
//! - Malformed bodies are rejected with 400
//! - Notifications are routed to the requested channel
//! - Processes can be watched and unwatched at runtime
//! - The server stops on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::http::StatusCode;
use serde_json::{Value, json};
use server_watchdog::api::{ApiConfig, ApiState, spawn_api_server};
use server_watchdog::engine::Shutdown;
use server_watchdog::monitors::ProcessMonitor;
use server_watchdog::notify::Severity;

use crate::helpers::{FakeProcesses, TestEnv};

const API_KEY: &str = "test-key";

struct TestApi {
    env: TestEnv,
    processes: ProcessMonitor,
    addr: SocketAddr,
    shutdown: Shutdown,
    client: reqwest::Client,
}

impl TestApi {
    async fn spawn() -> Self {
        let env = TestEnv::new();
        let probe = Arc::new(FakeProcesses::default());
        probe.spawn(4242, None, "app", "");

        let processes = ProcessMonitor::start(vec![], probe, &env.context()).await;
        let state = ApiState::new(env.notifier.clone(), processes.clone());
        let config = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            api_key: API_KEY.to_string(),
        };
        let shutdown = Shutdown::new();
        let addr = spawn_api_server(config, state, shutdown.clone()).await.unwrap();

        Self {
            env,
            processes,
            addr,
            shutdown,
            client: reqwest::Client::new(),
        }
    }

    fn url(&self, route: &str) -> String {
        format!("http://{}{}", self.addr, route)
    }

    async fn post(&self, route: &str, body: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .post(self.url(route))
            .header("X-Api-Key", API_KEY)
            .header("Content-Type", "application/json")
            .body(body.to_string())
            .send()
            .await
            .unwrap();
        let status = StatusCode::from_u16(response.status().as_u16()).unwrap();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);
        (status, body)
    }
}

#[tokio::test]
async fn test_ping_requires_api_key() {
    let api = TestApi::spawn().await;

    let response = api.client.get(api.url("/ping")).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = api
        .client
        .get(api.url("/ping"))
        .header("X-Api-Key", "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    let response = api
        .client
        .get(api.url("/ping"))
        .header("X-Api-Key", API_KEY)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text().await.unwrap(), "pong");
}

#[tokio::test]
async fn test_notify_without_key_is_not_delivered() {
    let api = TestApi::spawn().await;

    let response = api
        .client
        .post(api.url("/notify"))
        .json(&json!({ "channel": "ops", "message": "hello" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status().as_u16(), 403);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(api.env.sink.len(), 0);
}

#[tokio::test]
async fn test_notify_routes_to_channel() {
    let api = TestApi::spawn().await;

    let (status, _) = api
        .post(
            "/notify",
            r#"{"channel": "OPS", "message": "backup finished", "severity": "warning"}"#,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    assert!(api.env.sink.wait_for(1, Duration::from_secs(2)).await);
    let events = api.env.sink.events();
    assert_eq!(events[0].message, "backup finished");
    assert_eq!(events[0].severity, Severity::Warn);
    assert_eq!(events[0].channel, "ops");
}

#[tokio::test]
async fn test_malformed_bodies_are_rejected() {
    let api = TestApi::spawn().await;

    for body in [
        "not json",
        r#"{"channel": "ops"}"#,
        r#"{"channel": "ops", "message": 5}"#,
        r#"{"channel": "ops", "message": "x", "severity": "loud"}"#,
    ] {
        let (status, body) = api.post("/notify", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    let (status, _) = api
        .post("/notify", r#"{"channel": "nowhere", "message": "x"}"#)
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    for body in [
        r#"{"channel": "ops", "pid": 0}"#,
        r#"{"channel": "ops", "pid": -1}"#,
        r#"{"channel": "ops", "pid": 2147483648}"#,
        r#"{"channel": "ops", "pid": "4242"}"#,
    ] {
        let (status, _) = api.post("/process/watch", body).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}

#[tokio::test]
async fn test_watch_and_unwatch_process() {
    let api = TestApi::spawn().await;

    let (status, body) = api
        .post("/process/watch", r#"{"channel": "ops", "pid": 999}"#)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "Process not found");

    let (status, _) = api
        .post(
            "/process/watch",
            r#"{"channel": "ops", "pid": 4242, "name": "app", "severity": "info"}"#,
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let entries = api.processes.entries().await;
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].pid, 4242);
    assert_eq!(entries[0].name.as_deref(), Some("app"));
    assert_eq!(entries[0].severity, Severity::Info);

    let (status, _) = api
        .post("/process/unwatch", r#"{"channel": "ops", "pid": 4242}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(api.processes.entries().await.is_empty());

    // unwatching again still succeeds
    let (status, _) = api
        .post("/process/unwatch", r#"{"channel": "ops", "pid": 4242}"#)
        .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_server_stops_on_shutdown() {
    let api = TestApi::spawn().await;
    api.shutdown.trigger();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let mut refused = false;
    while tokio::time::Instant::now() < deadline {
        let result = reqwest::Client::new()
            .get(api.url("/ping"))
            .header("X-Api-Key", API_KEY)
            .send()
            .await;
        if result.is_err() {
            refused = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(refused);
}
