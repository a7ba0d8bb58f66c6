//! The watchdog engine instance
//!
//! Owns the state store, the notification dispatcher and one monitor per
//! kind. Monitors are started in dependency order and stopped in reverse:
//!
//! ```text
//! start: store → dispatcher → processes → disks → webs → tcp ports
//! stop:  tcp ports → webs → disks → processes → dispatcher
//! ```

use std::sync::Arc;

use anyhow::Context;
use tracing::{debug, info};

use crate::api::ApiState;
use crate::config::ResolvedConfig;
use crate::engine::MonitorContext;
use crate::monitors::{
    DiskSpaceMonitor, DiskSpaceProbe, ProcessMonitor, ProcessProbe, SysinfoDisks, SysinfoProcesses,
    TcpPortGroupMonitor, WebMonitor,
};
use crate::notify::NotificationDispatcher;
use crate::state::StateStore;

/// Host facilities the monitors read from.
#[derive(Clone)]
pub struct Probes {
    pub disks: Arc<dyn DiskSpaceProbe>,
    pub processes: Arc<dyn ProcessProbe>,
}

impl Default for Probes {
    fn default() -> Self {
        Self {
            disks: Arc::new(SysinfoDisks),
            processes: Arc::new(SysinfoProcesses::new()),
        }
    }
}

pub struct Watchdog {
    store: Arc<StateStore>,
    notifier: Arc<NotificationDispatcher>,
    processes: ProcessMonitor,
    disks: DiskSpaceMonitor,
    webs: WebMonitor,
    tcp_ports: TcpPortGroupMonitor,
}

impl Watchdog {
    pub async fn start(config: ResolvedConfig) -> anyhow::Result<Self> {
        Self::start_with(config, Probes::default()).await
    }

    /// Build every component and restore persisted state. Nothing is
    /// checked until [`Watchdog::run`].
    pub async fn start_with(config: ResolvedConfig, probes: Probes) -> anyhow::Result<Self> {
        debug!(state_dir = %config.state_dir.display(), "starting watchdog");
        let store = Arc::new(StateStore::new(&config.state_dir));

        let notifier = Arc::new(
            NotificationDispatcher::from_config(&config)
                .context("failed to set up notification channels")?,
        );
        notifier.run().await;

        let context = MonitorContext::new(store.clone(), notifier.clone());
        let processes =
            ProcessMonitor::start(config.processes.clone(), probes.processes, &context).await;
        let disks =
            DiskSpaceMonitor::from_config(&config.free_disk_space, probes.disks, &context).await;
        let webs = WebMonitor::from_config(&config.webs, &context)
            .await
            .context("failed to set up web checks")?;
        let tcp_ports = TcpPortGroupMonitor::from_config(&config.tcp_ports, &context).await;

        Ok(Self {
            store,
            notifier,
            processes,
            disks,
            webs,
            tcp_ports,
        })
    }

    /// Start every monitor loop.
    pub async fn run(&mut self) {
        self.processes.run().await;
        self.disks.run();
        self.webs.run();
        self.tcp_ports.run();
        info!(
            disks = self.disks.items().len(),
            webs = self.webs.items().len(),
            tcp_ports = self.tcp_ports.items().len(),
            "watchdog running"
        );
    }

    /// Stop all monitors, then drain pending notifications.
    pub async fn stop(&mut self) {
        self.tcp_ports.stop().await;
        self.webs.stop().await;
        self.disks.stop().await;
        self.processes.stop().await;
        self.notifier.stop().await;
        info!("watchdog stopped");
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn notifier(&self) -> &Arc<NotificationDispatcher> {
        &self.notifier
    }

    pub fn processes(&self) -> &ProcessMonitor {
        &self.processes
    }

    pub fn api_state(&self) -> ApiState {
        ApiState::new(self.notifier.clone(), self.processes.clone())
    }
}
