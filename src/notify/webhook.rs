//! Chat webhook sink
//!
//! Posts `{"text": "[LEVEL] <app>: <message>"}` to the configured URL. A
//! `429 Too Many Requests` answer is retried after the delay named by the
//! `Retry-After` header; the wait is abandoned as soon as shutdown starts.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode, header::RETRY_AFTER};
use serde_json::json;
use tracing::{debug, instrument, warn};

use crate::engine::Shutdown;

use super::error::DeliveryError;
use super::event::NotificationEvent;
use super::Sink;

/// Delay used when a 429 answer has no usable `Retry-After` header.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct WebhookSink {
    url: String,
    app_name: String,
    client: Client,
    shutdown: Shutdown,
}

impl WebhookSink {
    pub fn new(
        url: impl Into<String>,
        app_name: impl Into<String>,
        shutdown: Shutdown,
    ) -> Result<Self, DeliveryError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            url: url.into(),
            app_name: app_name.into(),
            client,
            shutdown,
        })
    }

    fn text(&self, event: &NotificationEvent) -> String {
        format!(
            "[{}] {}: {}",
            event.severity.label(),
            self.app_name,
            event.message
        )
    }
}

#[async_trait]
impl Sink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    #[instrument(skip_all, fields(channel = %event.channel))]
    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        let payload = json!({ "text": self.text(event) });

        loop {
            let response = self.client.post(&self.url).json(&payload).send().await?;
            let status = response.status();

            if status == StatusCode::OK {
                debug!("webhook notification delivered");
                return Ok(());
            }
            if status != StatusCode::TOO_MANY_REQUESTS {
                return Err(DeliveryError::Status(status.as_u16()));
            }

            let header = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|value| value.to_str().ok());
            let delay = parse_retry_after(header, Utc::now());
            warn!("webhook is rate limited, retrying in {delay:?}");

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = self.shutdown.wait() => return Err(DeliveryError::Cancelled),
            }
        }
    }
}

/// Interpret a `Retry-After` header value: either delta-seconds or an
/// HTTP-date. Missing, malformed, zero or past values fall back to
/// [`DEFAULT_RETRY_AFTER`].
pub fn parse_retry_after(value: Option<&str>, now: DateTime<Utc>) -> Duration {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return DEFAULT_RETRY_AFTER;
    };

    if let Ok(seconds) = value.parse::<u64>() {
        return if seconds > 0 {
            Duration::from_secs(seconds)
        } else {
            DEFAULT_RETRY_AFTER
        };
    }

    DateTime::parse_from_rfc2822(value)
        .ok()
        .and_then(|date| (date.with_timezone(&Utc) - now).to_std().ok())
        .filter(|delay| !delay.is_zero())
        .unwrap_or(DEFAULT_RETRY_AFTER)
}
