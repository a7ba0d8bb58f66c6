//! Free disk space checks

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use sysinfo::Disks;
use tracing::warn;

use crate::config::ResolvedDiskConfig;
use crate::engine::{AtomicHealth, CheckOutcome, CheckTarget, Health, Monitor, MonitorContext, ScheduledItem};
use crate::state::IdentityHasher;

pub const STATE_KEY: &str = "diskcheck";

/// Capacity and free space of one device, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskUsage {
    pub total: u64,
    pub available: u64,
}

/// Source of disk usage figures.
pub trait DiskSpaceProbe: Send + Sync {
    /// Usage of the device holding `device` (a mount point or any path on it).
    fn usage(&self, device: &Path) -> std::io::Result<DiskUsage>;
}

/// [`DiskSpaceProbe`] backed by `sysinfo`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoDisks;

impl DiskSpaceProbe for SysinfoDisks {
    fn usage(&self, device: &Path) -> std::io::Result<DiskUsage> {
        let disks = Disks::new_with_refreshed_list();

        // an exact device name wins, otherwise the deepest mount point
        // containing the path
        let disk = disks
            .iter()
            .find(|disk| Path::new(disk.name()) == device)
            .or_else(|| {
                disks
                    .iter()
                    .filter(|disk| device.starts_with(disk.mount_point()))
                    .max_by_key(|disk| disk.mount_point().components().count())
            })
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("no mounted disk holds {}", device.display()),
                )
            })?;

        Ok(DiskUsage {
            total: disk.total_space(),
            available: disk.available_space(),
        })
    }
}

pub struct DiskTarget {
    device: PathBuf,
    minimum_free: u64,
    identity: u64,
    health: AtomicHealth,
    probe: Arc<dyn DiskSpaceProbe>,
}

impl DiskTarget {
    pub fn new(config: &ResolvedDiskConfig, probe: Arc<dyn DiskSpaceProbe>) -> Self {
        let identity = IdentityHasher::new()
            .field(config.device.to_string_lossy().as_bytes())
            .field(&config.channel)
            .field(config.severity.as_str())
            .finish();
        Self {
            device: config.device.clone(),
            minimum_free: config.minimum_free,
            identity,
            health: AtomicHealth::default(),
            probe,
        }
    }

    pub fn health(&self) -> Health {
        self.health.load()
    }

    async fn probe_health(&self) -> Health {
        let probe = self.probe.clone();
        let device = self.device.clone();
        let usage = tokio::task::spawn_blocking(move || probe.usage(&device)).await;

        match usage {
            Ok(Ok(usage)) => Health::from_ok(usage.available >= self.minimum_free),
            Ok(Err(e)) => {
                warn!("failed to read free space of {}: {e}", self.device.display());
                Health::Unhealthy
            }
            Err(e) => {
                warn!("disk probe of {} panicked: {e}", self.device.display());
                Health::Unhealthy
            }
        }
    }
}

#[async_trait]
impl CheckTarget for DiskTarget {
    type Status = Health;

    fn identity(&self) -> u64 {
        self.identity
    }

    fn describe(&self) -> String {
        self.device.display().to_string()
    }

    fn status(&self) -> Health {
        self.health.load()
    }

    fn restore(&self, status: Health) {
        self.health.store(status);
    }

    async fn check(&self) -> CheckOutcome {
        let current = self.probe_health().await;
        let previous = self.health.swap(current);
        CheckOutcome::transition(previous, current, || {
            format!("Disk space on '{}' is low.", self.device.display())
        })
    }
}

pub type DiskSpaceMonitor = Monitor<DiskTarget>;

impl DiskSpaceMonitor {
    pub async fn from_config(
        configs: &[ResolvedDiskConfig],
        probe: Arc<dyn DiskSpaceProbe>,
        context: &MonitorContext,
    ) -> Self {
        let items = configs
            .iter()
            .map(|config| {
                ScheduledItem::new(
                    DiskTarget::new(config, probe.clone()),
                    &config.channel,
                    config.severity,
                    config.interval,
                )
            })
            .collect();
        Monitor::start(STATE_KEY, items, context).await
    }
}
