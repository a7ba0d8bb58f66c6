//! Integration tests for notification delivery
//!
//! These tests verify that:
//! - A rate limited webhook is retried once after `Retry-After`
//! - A pending retry is cancelled by shutdown
//! - Settings resolve into a dispatcher that writes log files and posts to
//!   the webhook, and stopping drains pending deliveries

use std::time::{Duration, Instant};

use serde_json::{Value, json};
use server_watchdog::config::Config;
use server_watchdog::engine::Shutdown;
use server_watchdog::notify::{
    DeliveryError, NotificationDispatcher, NotificationEvent, Severity, Sink, WebhookSink,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::FakeDisk;

fn event(message: &str) -> NotificationEvent {
    NotificationEvent::now("ops", Severity::Error, message, false)
}

#[tokio::test]
async fn test_rate_limited_webhook_retries_after_delay() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "2"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let sink = WebhookSink::new(server.uri(), "TEST", Shutdown::new()).unwrap();
    let started = Instant::now();
    sink.deliver(&event("disk full")).await.unwrap();

    assert!(started.elapsed() >= Duration::from_secs(2));
    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
}

#[tokio::test]
async fn test_shutdown_cancels_pending_retry() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "30"))
        .mount(&server)
        .await;

    let shutdown = Shutdown::new();
    let sink = WebhookSink::new(server.uri(), "TEST", shutdown.clone()).unwrap();
    let delivery = tokio::spawn(async move { sink.deliver(&event("disk full")).await });

    let deadline = Instant::now() + Duration::from_secs(2);
    while server.received_requests().await.unwrap().is_empty() && Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    shutdown.trigger();

    let result = tokio::time::timeout(Duration::from_secs(1), delivery)
        .await
        .expect("delivery should stop on shutdown")
        .unwrap();
    assert!(matches!(result, Err(DeliveryError::Cancelled)));
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_configured_channel_reaches_file_and_webhook() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config: Config = serde_json::from_value(json!({
        "name": "EDGE-01",
        "server": { "port": 8080, "api_key": "secret" },
        "state_dir": "state",
        "log": { "folder": "logs", "max_age": "1d" },
        "channels": {
            "Ops": {
                "file": { "enabled": true },
                "webhook": { "url": format!("{}/hook", server.uri()) }
            }
        }
    }))
    .unwrap();
    let resolved = config.resolve(dir.path(), FakeDisk::new(0).as_ref()).unwrap();

    let dispatcher = NotificationDispatcher::from_config(&resolved).unwrap();
    dispatcher.run().await;
    dispatcher
        .notify(Severity::Warn, "OPS", "certificate expires soon")
        .unwrap();
    dispatcher.stop().await;

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 1);
    let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["text"], "[WARN] EDGE-01: certificate expires soon");

    let logs: Vec<_> = std::fs::read_dir(dir.path().join("logs").join("ops"))
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .collect();
    assert_eq!(logs.len(), 1);
    let content = std::fs::read_to_string(&logs[0]).unwrap();
    assert!(content.ends_with("- certificate expires soon\n"));
}
