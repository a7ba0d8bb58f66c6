//! Process liveness watching and discovery
//!
//! Unlike the scheduled monitors this one polls on a fixed cadence. Every
//! tick it lists the running processes once and uses that snapshot for two
//! passes:
//!
//! ```text
//! tick ─→ list processes ─┬─→ watched pid gone?      ─→ remove + notify
//!                         └─→ matches a discovery rule
//!                             and never seen before?  ─→ add to watch list
//!                         ──→ anything changed?       ─→ save watch list
//! ```
//!
//! Entries can also be added and removed at runtime through
//! [`ProcessMonitor::add_process`] and [`ProcessMonitor::remove_process`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sysinfo::{Pid, Process, ProcessRefreshKind, ProcessStatus, ProcessesToUpdate, System, ThreadKind, UpdateKind};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};

use crate::config::ResolvedProcessRule;
use crate::engine::{MonitorContext, RundownGuard, Shutdown};
use crate::notify::{NotificationDispatcher, Severity};
use crate::state::StateStore;

pub const STATE_KEY: &str = "processwatcher";

/// Cadence of liveness checks and discovery passes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Largest pid accepted from callers.
pub const MAX_PID: u32 = 0x7FFF_FFFF;

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("Process not found")]
    NotFound(u32),

    #[error("unknown channel '{0}'")]
    UnknownChannel(String),
}

/// One watched process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessWatchEntry {
    pub pid: u32,
    pub name: Option<String>,
    pub channel: String,
    pub severity: Severity,
}

impl ProcessWatchEntry {
    fn label(&self) -> String {
        match &self.name {
            Some(name) => format!("\"{name}\" (#{})", self.pid),
            None => format!("#{}", self.pid),
        }
    }

    fn key(&self) -> WatchKey {
        (self.pid, self.channel.clone())
    }
}

type WatchKey = (u32, String);

/// A running process as seen by a [`ProcessProbe`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub pid: u32,
    pub parent: Option<u32>,
    /// Executable name
    pub name: String,
    /// Command line arguments without the program, space separated
    pub args: String,
}

/// Source of process information.
pub trait ProcessProbe: Send + Sync {
    /// Every process currently running.
    fn processes(&self) -> Vec<ProcessInfo>;

    fn is_running(&self, pid: u32) -> bool;
}

/// [`ProcessProbe`] backed by `sysinfo`.
pub struct SysinfoProcesses {
    system: std::sync::Mutex<System>,
}

impl SysinfoProcesses {
    pub fn new() -> Self {
        Self {
            system: std::sync::Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProcesses {
    fn default() -> Self {
        Self::new()
    }
}

/// Running and not a thread of another process.
fn is_watchable(process: &Process) -> bool {
    !matches!(process.status(), ProcessStatus::Zombie | ProcessStatus::Dead)
        && !matches!(process.thread_kind(), Some(ThreadKind::Userland))
}

impl ProcessProbe for SysinfoProcesses {
    fn processes(&self) -> Vec<ProcessInfo> {
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            true,
            ProcessRefreshKind::nothing()
                .without_tasks()
                .with_cmd(UpdateKind::OnlyIfNotSet)
                .with_exe(UpdateKind::OnlyIfNotSet),
        );

        system
            .processes()
            .values()
            .filter(|process| is_watchable(process))
            .map(|process| {
                let name = process
                    .exe()
                    .and_then(|exe| exe.file_name())
                    .unwrap_or_else(|| process.name())
                    .to_string_lossy()
                    .to_string();
                let args = process
                    .cmd()
                    .iter()
                    .skip(1)
                    .map(|arg| arg.to_string_lossy())
                    .collect::<Vec<_>>()
                    .join(" ");
                ProcessInfo {
                    pid: process.pid().as_u32(),
                    parent: process.parent().map(Pid::as_u32),
                    name,
                    args,
                }
            })
            .collect()
    }

    /// Thread ids resolve under `/proc` too, so liveness goes through the full
    /// listing rather than a single pid refresh.
    fn is_running(&self, pid: u32) -> bool {
        self.processes().iter().any(|process| process.pid == pid)
    }
}

#[derive(Clone)]
pub struct ProcessMonitor {
    inner: Arc<Inner>,
}

struct Inner {
    rules: Vec<ResolvedProcessRule>,
    entries: Mutex<BTreeMap<WatchKey, ProcessWatchEntry>>,
    /// (pid, channel) pairs discovery already added once
    discovered: Mutex<HashSet<WatchKey>>,
    probe: Arc<dyn ProcessProbe>,
    rundown: Arc<RundownGuard>,
    shutdown: Shutdown,
    store: Arc<StateStore>,
    notifier: Arc<NotificationDispatcher>,
    poll_interval: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProcessMonitor {
    /// Build the monitor and reload the persisted watch list. Entries whose
    /// process ended while the watchdog was not running are reported and
    /// dropped.
    pub async fn start(
        rules: Vec<ResolvedProcessRule>,
        probe: Arc<dyn ProcessProbe>,
        context: &MonitorContext,
    ) -> Self {
        Self::start_with_interval(rules, probe, context, POLL_INTERVAL).await
    }

    pub async fn start_with_interval(
        rules: Vec<ResolvedProcessRule>,
        probe: Arc<dyn ProcessProbe>,
        context: &MonitorContext,
        poll_interval: Duration,
    ) -> Self {
        let monitor = Self {
            inner: Arc::new(Inner {
                rules,
                entries: Mutex::new(BTreeMap::new()),
                discovered: Mutex::new(HashSet::new()),
                probe,
                rundown: Arc::new(RundownGuard::new()),
                shutdown: Shutdown::new(),
                store: context.store.clone(),
                notifier: context.notifier.clone(),
                poll_interval,
                task: Mutex::new(None),
            }),
        };
        monitor.load_state().await;
        monitor
    }

    async fn load_state(&self) {
        let saved = match self.inner.store.load::<ProcessWatchEntry>(STATE_KEY).await {
            Ok(Some(saved)) => saved,
            Ok(None) => return,
            Err(e) => {
                warn!("ignoring unreadable process watch list: {e}");
                return;
            }
        };

        let mut entries = self.inner.entries.lock().await;
        let mut dropped = false;
        for entry in saved {
            if self.is_running(entry.pid).await {
                entries.insert(entry.key(), entry);
            } else {
                dropped = true;
                self.notify(
                    &entry,
                    format!(
                        "The process {} has died while the server watcher was down.",
                        entry.label()
                    ),
                );
            }
        }
        debug!(watched = entries.len(), "restored process watch list");

        if dropped {
            self.save(&entries).await;
        }
    }

    /// Start the polling loop in the background.
    pub async fn run(&self) {
        let mut task = self.inner.task.lock().await;
        if task.is_some() {
            warn!("process monitor already running");
            return;
        }
        let Some(token) = self.inner.rundown.enter() else {
            warn!("process monitor is stopping, not starting");
            return;
        };

        let monitor = self.clone();
        *task = Some(tokio::spawn(async move {
            let _token = token;
            monitor.poll_loop().await;
        }));
    }

    #[instrument(skip_all)]
    async fn poll_loop(&self) {
        debug!(rules = self.inner.rules.len(), "starting process monitor");
        let mut ticker = tokio::time::interval(self.inner.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.poll_once().await,
                _ = self.inner.shutdown.wait() => break,
            }
        }
        debug!("process monitor stopped");
    }

    /// Signal shutdown and wait for the loop and any pending save.
    pub async fn stop(&self) {
        self.inner.shutdown.trigger();
        self.inner.rundown.wait().await;

        let task = self.inner.task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                error!("process monitor task failed: {e}");
            }
        }
    }

    /// One liveness and discovery pass.
    pub async fn poll_once(&self) {
        let Some(_token) = self.inner.rundown.enter() else {
            return;
        };

        let probe = self.inner.probe.clone();
        let processes = match tokio::task::spawn_blocking(move || probe.processes()).await {
            Ok(processes) => processes,
            Err(e) => {
                error!("failed to list processes: {e}");
                return;
            }
        };
        let by_pid: HashMap<u32, &ProcessInfo> = processes.iter().map(|p| (p.pid, p)).collect();

        let mut entries = self.inner.entries.lock().await;
        let mut changed = false;

        let gone: Vec<WatchKey> = entries
            .keys()
            .filter(|(pid, _)| !by_pid.contains_key(pid))
            .cloned()
            .collect();
        for key in gone {
            if let Some(entry) = entries.remove(&key) {
                changed = true;
                self.notify(&entry, format!("The process {} has died.", entry.label()));
            }
        }

        let mut discovered = self.inner.discovered.lock().await;
        discovered.retain(|(pid, _)| by_pid.contains_key(pid));
        for rule in &self.inner.rules {
            for process in processes.iter().filter(|p| matches_rule(rule, p, &by_pid)) {
                let key = (process.pid, rule.channel.clone());
                if !discovered.insert(key.clone()) || entries.contains_key(&key) {
                    continue;
                }
                info!(pid = process.pid, name = %rule.name, "watching discovered process");
                entries.insert(
                    key,
                    ProcessWatchEntry {
                        pid: process.pid,
                        name: Some(rule.name.clone()),
                        channel: rule.channel.clone(),
                        severity: rule.severity,
                    },
                );
                changed = true;
            }
        }
        drop(discovered);

        if changed {
            self.save(&entries).await;
        }
    }

    /// Start watching `pid`. Returns `Ok(false)` when the process is already
    /// watched on that channel.
    pub async fn add_process(
        &self,
        pid: u32,
        name: Option<String>,
        severity: Severity,
        channel: &str,
    ) -> Result<bool, ProcessError> {
        let channel = channel.to_lowercase();
        if !self.inner.notifier.has_channel(&channel) {
            return Err(ProcessError::UnknownChannel(channel));
        }
        if !self.is_running(pid).await {
            return Err(ProcessError::NotFound(pid));
        }

        let mut entries = self.inner.entries.lock().await;
        let key = (pid, channel.clone());
        if entries.contains_key(&key) {
            return Ok(false);
        }
        entries.insert(
            key,
            ProcessWatchEntry {
                pid,
                name: name.filter(|n| !n.trim().is_empty()),
                channel,
                severity,
            },
        );
        info!(pid, "watching process");
        self.save(&entries).await;
        Ok(true)
    }

    /// Stop watching `pid` on `channel`. Returns whether an entry was removed.
    pub async fn remove_process(&self, pid: u32, channel: &str) -> bool {
        let mut entries = self.inner.entries.lock().await;
        let removed = entries.remove(&(pid, channel.to_lowercase())).is_some();
        if removed {
            info!(pid, "stopped watching process");
            self.save(&entries).await;
        }
        removed
    }

    pub async fn entries(&self) -> Vec<ProcessWatchEntry> {
        self.inner.entries.lock().await.values().cloned().collect()
    }

    async fn is_running(&self, pid: u32) -> bool {
        let probe = self.inner.probe.clone();
        tokio::task::spawn_blocking(move || probe.is_running(pid))
            .await
            .unwrap_or(false)
    }

    fn notify(&self, entry: &ProcessWatchEntry, message: String) {
        if let Err(e) = self
            .inner
            .notifier
            .notify(entry.severity, &entry.channel, message)
        {
            error!(pid = entry.pid, "failed to raise process alert: {e}");
        }
    }

    /// Persist the watch list; callers hold the entries lock so snapshots are
    /// written in order.
    async fn save(&self, entries: &BTreeMap<WatchKey, ProcessWatchEntry>) {
        let Some(_token) = self.inner.rundown.enter() else {
            debug!("process monitor is stopping, skipping state save");
            return;
        };
        let snapshot: Vec<_> = entries.values().cloned().collect();
        if let Err(e) = self.inner.store.save(STATE_KEY, &snapshot).await {
            error!("failed to persist process watch list: {e}");
        }
    }
}

/// Whether `process` matches `rule`. Without `include_children`, a process
/// whose parent or grandparent runs the same executable is skipped, so only
/// the root of a forking server is watched.
fn matches_rule(
    rule: &ResolvedProcessRule,
    process: &ProcessInfo,
    by_pid: &HashMap<u32, &ProcessInfo>,
) -> bool {
    if !rule.executable.matches(&process.name) {
        return false;
    }
    if let Some(args) = &rule.args {
        if !args.matches(&process.args) {
            return false;
        }
    }
    if rule.include_children {
        return true;
    }

    let mut ancestor = process.parent;
    for _ in 0..2 {
        let Some(parent) = ancestor.and_then(|pid| by_pid.get(&pid)) else {
            break;
        };
        if parent.pid == process.pid {
            break;
        }
        if parent.name == process.name {
            return false;
        }
        ancestor = parent.parent;
    }
    true
}
