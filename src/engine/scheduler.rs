//! Generic periodic check scheduler
//!
//! A [`Monitor`] owns a fixed list of [`ScheduledItem`]s, each with its own
//! check interval, and runs one background loop that fires every item whose
//! countdown has elapsed. Checks run as separate tasks; at most one check per
//! item is in flight at any time.
//!
//! ## Scheduling Loop
//!
//! ```text
//!        ┌─────────────────────────────────────────────────┐
//!        ▼                                                 │
//! wait = min(next_check_in of idle items)                  │
//!        │                                                 │
//! select!├── shutdown ─────────────→ exit                  │
//!        ├── wait elapsed ──────┐                          │
//!        └── check completed ───┴─→ dispatch_due(elapsed) ─┘
//! ```
//!
//! ## Check Completion
//!
//! ```text
//! check() → status changed?      ──yes─→ save snapshot (task)
//!         → healthy → unhealthy? ──yes─→ notify channel
//!         → mark idle → signal loop → release rundown
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, instrument, trace, warn};

use crate::notify::{NotificationDispatcher, Severity};
use crate::state::{self, PersistedRecord, StateStore};

use super::rundown::{RundownGuard, RundownToken};
use super::shutdown::Shutdown;
use super::status::{AtomicCheckState, CheckState, Health};
use super::MonitorContext;

const COMPLETION_QUEUE: usize = 64;

/// The monitored resource behind a [`ScheduledItem`].
///
/// Implementations keep their last observed status internally and report in
/// the [`CheckOutcome`] whether a check changed it.
#[async_trait]
pub trait CheckTarget: Send + Sync + 'static {
    /// Status persisted across restarts.
    type Status: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Stable hash of the immutable configuration of this target.
    fn identity(&self) -> u64;

    /// Human readable name for diagnostics.
    fn describe(&self) -> String;

    fn status(&self) -> Self::Status;

    fn restore(&self, status: Self::Status);

    /// Probe the resource once. Probe failures count as unhealthy.
    async fn check(&self) -> CheckOutcome;
}

/// Result of a single check.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckOutcome {
    /// The persisted status differs from before the check.
    pub changed: bool,
    /// Alert text to raise on the item's channel.
    pub alert: Option<String>,
}

impl CheckOutcome {
    /// Outcome of a plain healthy/unhealthy transition. Only a drop from
    /// healthy to unhealthy raises an alert; recovery is recorded silently.
    pub fn transition(previous: Health, current: Health, alert: impl FnOnce() -> String) -> Self {
        Self {
            changed: previous != current,
            alert: (previous.is_healthy() && !current.is_healthy()).then(alert),
        }
    }
}

/// A target plus its scheduling bookkeeping.
pub struct ScheduledItem<T> {
    target: T,
    channel: String,
    severity: Severity,
    interval: Duration,
    /// Remaining time until the next check, in milliseconds.
    next_check_in: AtomicU64,
    state: AtomicCheckState,
}

impl<T> ScheduledItem<T> {
    /// New items are due immediately.
    pub fn new(target: T, channel: impl Into<String>, severity: Severity, interval: Duration) -> Self {
        Self {
            target,
            channel: channel.into(),
            severity,
            interval,
            next_check_in: AtomicU64::new(0),
            state: AtomicCheckState::default(),
        }
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn severity(&self) -> Severity {
        self.severity
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn next_check_in(&self) -> Duration {
        Duration::from_millis(self.next_check_in.load(Ordering::Acquire))
    }

    pub fn check_state(&self) -> CheckState {
        self.state.load()
    }

    fn set_next_check_in(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.next_check_in.store(millis, Ordering::Release);
    }
}

/// One monitor kind: its items, scheduling loop and rundown protection.
pub struct Monitor<T: CheckTarget> {
    core: Arc<MonitorCore<T>>,
    completions: Option<mpsc::Receiver<()>>,
    task: Option<JoinHandle<()>>,
}

struct MonitorCore<T: CheckTarget> {
    kind: &'static str,
    items: Vec<ScheduledItem<T>>,
    rundown: Arc<RundownGuard>,
    shutdown: Shutdown,
    completed: mpsc::Sender<()>,
    store: Arc<StateStore>,
    notifier: Arc<NotificationDispatcher>,
    // snapshot and write together so an older snapshot never lands last
    save_lock: Mutex<()>,
}

impl<T: CheckTarget> Monitor<T> {
    /// Build the monitor and restore the persisted status of its items.
    ///
    /// `kind` names the state file of this monitor.
    pub async fn start(
        kind: &'static str,
        items: Vec<ScheduledItem<T>>,
        context: &MonitorContext,
    ) -> Self {
        let (completed, completions) = mpsc::channel(COMPLETION_QUEUE);
        let core = Arc::new(MonitorCore {
            kind,
            items,
            rundown: Arc::new(RundownGuard::new()),
            shutdown: Shutdown::new(),
            completed,
            store: context.store.clone(),
            notifier: context.notifier.clone(),
            save_lock: Mutex::new(()),
        });
        core.load_state().await;

        Self {
            core,
            completions: Some(completions),
            task: None,
        }
    }

    pub fn kind(&self) -> &'static str {
        self.core.kind
    }

    pub fn items(&self) -> &[ScheduledItem<T>] {
        &self.core.items
    }

    /// Launch the scheduling loop in the background.
    pub fn run(&mut self) {
        let Some(completions) = self.completions.take() else {
            warn!(monitor = self.core.kind, "scheduler loop already started");
            return;
        };
        let Some(token) = self.core.rundown.enter() else {
            warn!(monitor = self.core.kind, "monitor is stopping, not starting");
            return;
        };
        self.task = Some(tokio::spawn(
            Arc::clone(&self.core).run_loop(completions, token),
        ));
    }

    /// Signal shutdown and wait until the loop, every running check and
    /// every pending state save have finished.
    pub async fn stop(&mut self) {
        self.core.shutdown.trigger();
        self.core.rundown.wait().await;

        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(monitor = self.core.kind, "scheduler task failed: {e}");
            }
        }
        debug!(monitor = self.core.kind, "monitor stopped");
    }
}

impl<T: CheckTarget> MonitorCore<T> {
    #[instrument(skip_all, fields(monitor = self.kind))]
    async fn run_loop(self: Arc<Self>, mut completions: mpsc::Receiver<()>, _token: RundownToken) {
        debug!(items = self.items.len(), "starting scheduler loop");

        loop {
            let time_to_wait = self.time_to_wait();
            let started = Instant::now();

            tokio::select! {
                _ = self.shutdown.wait() => break,
                _ = sleep_or_forever(time_to_wait) => self.dispatch_due(started.elapsed()),
                Some(()) = completions.recv() => self.dispatch_due(started.elapsed()),
            }
        }

        debug!("scheduler loop stopped");
    }

    /// Shortest countdown among items without a running check. `None` when
    /// there is nothing to wait for.
    fn time_to_wait(&self) -> Option<Duration> {
        self.items
            .iter()
            .filter(|item| item.check_state() == CheckState::Idle)
            .map(ScheduledItem::next_check_in)
            .min()
    }

    /// Advance every idle item's countdown by `elapsed` and start a check for
    /// each one that became due.
    fn dispatch_due(self: &Arc<Self>, elapsed: Duration) {
        for (index, item) in self.items.iter().enumerate() {
            if !item.state.try_begin() {
                continue;
            }

            let remaining = item.next_check_in();
            if elapsed < remaining {
                item.set_next_check_in(remaining - elapsed);
                item.state.finish();
                continue;
            }

            item.set_next_check_in(item.interval);
            match self.rundown.enter() {
                Some(token) => {
                    trace!(target = %item.target.describe(), "dispatching check");
                    let core = Arc::clone(self);
                    tokio::spawn(core.run_check(index, token));
                }
                None => item.state.finish(),
            }
        }
    }

    async fn run_check(self: Arc<Self>, index: usize, token: RundownToken) {
        let Some(item) = self.items.get(index) else {
            return;
        };

        let outcome = item.target.check().await;
        trace!(target = %item.target.describe(), ?outcome, "check finished");

        if outcome.changed {
            self.spawn_save();
        }
        if let Some(message) = outcome.alert {
            if let Err(e) = self.notifier.notify(item.severity, &item.channel, message) {
                error!(target = %item.target.describe(), "failed to raise alert: {e}");
            }
        }

        item.state.finish();

        // the loop may already be gone; never block on it during shutdown
        tokio::select! {
            _ = self.completed.send(()) => {}
            _ = self.shutdown.wait() => {}
        }
        drop(token);
    }

    fn spawn_save(self: &Arc<Self>) {
        let Some(token) = self.rundown.enter() else {
            debug!(monitor = self.kind, "monitor is stopping, skipping state save");
            return;
        };
        let core = Arc::clone(self);
        tokio::spawn(async move {
            let _token = token;
            core.save_state().await;
        });
    }

    async fn save_state(&self) {
        let _guard = self.save_lock.lock().await;
        let records: Vec<_> = self
            .items
            .iter()
            .map(|item| PersistedRecord {
                identity: item.target.identity(),
                status: item.target.status(),
            })
            .collect();

        if let Err(e) = self.store.save(self.kind, &records).await {
            error!(monitor = self.kind, "failed to persist state: {e}");
        }
    }

    async fn load_state(&self) {
        let identities: Vec<u64> = self.items.iter().map(|i| i.target.identity()).collect();
        let restored = state::restore_records(&self.store, self.kind, &identities, |index, status| {
            if let Some(item) = self.items.get(index) {
                item.target.restore(status);
            }
        })
        .await;
        debug!(
            monitor = self.kind,
            restored,
            total = self.items.len(),
            "restored persisted status"
        );
    }
}

async fn sleep_or_forever(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}
