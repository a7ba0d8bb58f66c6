//! Notification fan-out
//!
//! Every notification is written to the console right away and then handed
//! to each sink enabled for its channel. Sink deliveries run as independent
//! tasks registered with a [`RundownGuard`], so a slow or failing sink never
//! holds up another one and [`NotificationDispatcher::stop`] can drain them.
//!
//! ## Message Flow
//!
//! ```text
//! notify(severity, channel, msg)
//!     ├─→ console (inline)
//!     └─→ channel sinks ─┬─→ file     (task)
//!                        ├─→ webhook  (task, 429 retry)
//!                        └─→ email    (task)
//! ```

pub mod console;
pub mod email;
pub mod error;
pub mod event;
pub mod file;
pub mod webhook;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::config::ResolvedConfig;
use crate::engine::{RundownGuard, Shutdown};

pub use console::ConsoleSink;
pub use email::EmailSink;
pub use error::{DeliveryError, NotifyError};
pub use event::{NotificationEvent, Severity};
pub use file::FileSink;
pub use webhook::WebhookSink;

/// Upper bound for draining pending deliveries on stop.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// A notification destination.
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// delivery task of the channels it is attached to.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Short name used in diagnostics.
    fn name(&self) -> &str;

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError>;
}

pub struct NotificationDispatcher {
    use_local_time: bool,
    console: ConsoleSink,
    channels: HashMap<String, Vec<Arc<dyn Sink>>>,
    file: Option<Arc<FileSink>>,
    rundown: Arc<RundownGuard>,
    shutdown: Shutdown,
    drain_timeout: Duration,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl NotificationDispatcher {
    pub fn new(use_local_time: bool) -> Self {
        Self {
            use_local_time,
            console: ConsoleSink,
            channels: HashMap::new(),
            file: None,
            rundown: Arc::new(RundownGuard::new()),
            shutdown: Shutdown::new(),
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            sweeper: Mutex::new(None),
        }
    }

    /// Build the dispatcher and every configured sink.
    pub fn from_config(config: &ResolvedConfig) -> anyhow::Result<Self> {
        let mut dispatcher = Self::new(config.log.use_local_time);
        let file = Arc::new(FileSink::new(&config.log.folder, config.log.max_age));

        for (name, channel) in &config.channels {
            let mut sinks: Vec<Arc<dyn Sink>> = vec![];
            if channel.file {
                sinks.push(file.clone());
                dispatcher.file = Some(file.clone());
            }
            if let Some(webhook) = &channel.webhook {
                let sink = WebhookSink::new(&webhook.url, &config.name, dispatcher.shutdown.clone())
                    .with_context(|| format!("failed to set up webhook of channel '{name}'"))?;
                sinks.push(Arc::new(sink));
            }
            if let Some(email) = &channel.email {
                let sink = EmailSink::new(&config.name, email)
                    .with_context(|| format!("failed to set up email of channel '{name}'"))?;
                sinks.push(Arc::new(sink));
            }
            dispatcher = dispatcher.with_channel(name, sinks);
        }

        Ok(dispatcher)
    }

    /// Register a channel and its sinks. Channel names are case-insensitive.
    pub fn with_channel(mut self, name: impl AsRef<str>, sinks: Vec<Arc<dyn Sink>>) -> Self {
        self.channels
            .entry(name.as_ref().to_lowercase())
            .or_default()
            .extend(sinks);
        self
    }

    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    pub fn has_channel(&self, channel: &str) -> bool {
        self.channels.contains_key(&channel.to_lowercase())
    }

    /// Deliver a notification to every sink of `channel`.
    ///
    /// Console output happens before this returns; the remaining sinks are
    /// delivered in the background. Once the dispatcher is stopping, only the
    /// console still receives the notification.
    pub fn notify(
        &self,
        severity: Severity,
        channel: &str,
        message: impl Into<String>,
    ) -> Result<(), NotifyError> {
        let channel = channel.to_lowercase();
        let Some(sinks) = self.channels.get(&channel) else {
            return Err(NotifyError::UnknownChannel(channel));
        };

        let event = Arc::new(NotificationEvent::now(
            channel,
            severity,
            message,
            self.use_local_time,
        ));
        self.console.write(&event);

        for sink in sinks {
            let Some(token) = self.rundown.enter() else {
                debug!(sink = sink.name(), "dispatcher is stopping, skipping delivery");
                continue;
            };
            let sink = sink.clone();
            let event = event.clone();
            tokio::spawn(async move {
                let _token = token;
                if let Err(e) = sink.deliver(&event).await {
                    error!(
                        sink = sink.name(),
                        channel = %event.channel,
                        "failed to deliver notification: {e}"
                    );
                }
            });
        }

        Ok(())
    }

    /// Start background maintenance (log file sweeping).
    pub async fn run(&self) {
        let Some(file) = self.file.clone() else {
            return;
        };
        let mut sweeper = self.sweeper.lock().await;
        if sweeper.is_none() {
            *sweeper = Some(tokio::spawn(file.run_sweeper(self.shutdown.clone())));
        }
    }

    /// Stop accepting deliveries and wait, bounded by the drain timeout, for
    /// pending ones to finish.
    pub async fn stop(&self) {
        self.shutdown.trigger();

        if tokio::time::timeout(self.drain_timeout, self.rundown.wait())
            .await
            .is_err()
        {
            warn!(
                pending = self.rundown.in_flight(),
                "gave up waiting for pending notifications"
            );
        }

        let sweeper = self.sweeper.lock().await.take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                error!("log sweeper task failed: {e}");
            }
        }

        if let Some(file) = &self.file {
            file.close().await;
        }
    }
}
