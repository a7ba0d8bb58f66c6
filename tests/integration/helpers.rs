//! Helper functions for integration tests

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use server_watchdog::config::ResolvedDiskConfig;
use server_watchdog::engine::MonitorContext;
use server_watchdog::monitors::disk::{DiskSpaceProbe, DiskUsage};
use server_watchdog::monitors::process::{ProcessInfo, ProcessProbe};
use server_watchdog::notify::{
    DeliveryError, NotificationDispatcher, NotificationEvent, Severity, Sink,
};
use server_watchdog::state::StateStore;
use tempfile::TempDir;

pub const CHANNEL: &str = "ops";

/// Sink remembering every event it receives.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn messages(&self) -> Vec<String> {
        self.events().into_iter().map(|e| e.message).collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    /// Wait until at least `count` events arrived or `timeout` passed.
    pub async fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while tokio::time::Instant::now() < deadline {
            if self.len() >= count {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.len() >= count
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    async fn deliver(&self, event: &NotificationEvent) -> Result<(), DeliveryError> {
        self.events.lock().unwrap().push(event.clone());
        Ok(())
    }
}

/// A state directory, a dispatcher with a recorded `ops` channel and the
/// context monitors are started with.
pub struct TestEnv {
    pub dir: TempDir,
    pub sink: Arc<RecordingSink>,
    pub store: Arc<StateStore>,
    pub notifier: Arc<NotificationDispatcher>,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        Self::in_dir(dir)
    }

    /// Reuse an existing state directory, as a restarted daemon would.
    pub fn in_dir(dir: TempDir) -> Self {
        let sink = Arc::new(RecordingSink::default());
        let store = Arc::new(StateStore::new(dir.path().join("state")));
        let notifier = Arc::new(
            NotificationDispatcher::new(false)
                .with_channel(CHANNEL, vec![sink.clone() as Arc<dyn Sink>]),
        );
        Self {
            dir,
            sink,
            store,
            notifier,
        }
    }

    pub fn context(&self) -> MonitorContext {
        MonitorContext::new(self.store.clone(), self.notifier.clone())
    }
}

/// Process table that tests edit by hand.
#[derive(Default)]
pub struct FakeProcesses {
    processes: Mutex<Vec<ProcessInfo>>,
}

impl FakeProcesses {
    pub fn spawn(&self, pid: u32, parent: Option<u32>, name: &str, args: &str) {
        self.processes.lock().unwrap().push(ProcessInfo {
            pid,
            parent,
            name: name.to_string(),
            args: args.to_string(),
        });
    }

    pub fn kill(&self, pid: u32) {
        self.processes.lock().unwrap().retain(|p| p.pid != pid);
    }
}

impl ProcessProbe for FakeProcesses {
    fn processes(&self) -> Vec<ProcessInfo> {
        self.processes.lock().unwrap().clone()
    }

    fn is_running(&self, pid: u32) -> bool {
        self.processes.lock().unwrap().iter().any(|p| p.pid == pid)
    }
}

/// Disk with a fixed capacity of 1000 bytes and adjustable free space.
pub struct FakeDisk {
    available: AtomicU64,
}

impl FakeDisk {
    pub fn new(available: u64) -> Arc<Self> {
        Arc::new(Self {
            available: AtomicU64::new(available),
        })
    }

    pub fn set_available(&self, available: u64) {
        self.available.store(available, Ordering::SeqCst);
    }
}

impl DiskSpaceProbe for FakeDisk {
    fn usage(&self, _device: &Path) -> std::io::Result<DiskUsage> {
        Ok(DiskUsage {
            total: 1000,
            available: self.available.load(Ordering::SeqCst),
        })
    }
}

pub fn disk_config(device: &str, minimum_free: u64, interval: Duration) -> ResolvedDiskConfig {
    ResolvedDiskConfig {
        device: PathBuf::from(device),
        minimum_free,
        interval,
        channel: CHANNEL.to_string(),
        severity: Severity::Warn,
    }
}
