//! TCP port group checks
//!
//! A group dials every configured port of one address concurrently. Each
//! port keeps its own open/closed status; the group raises one alert per
//! check in which at least one previously open port is found closed.
//! Ports start out assumed open.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::trace;

use crate::config::ResolvedTcpConfig;
use crate::engine::{CheckOutcome, CheckTarget, Monitor, MonitorContext, ScheduledItem};
use crate::state::IdentityHasher;

pub const STATE_KEY: &str = "tcpportscheck";

/// Upper bound of simultaneous dials per group.
const MAX_CONCURRENT_DIALS: usize = 32;

/// Persisted status of one port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    pub port: u16,
    pub open: bool,
}

pub struct TcpPortGroupTarget {
    name: String,
    address: String,
    timeout: Duration,
    identity: u64,
    ports: Mutex<BTreeMap<u16, bool>>,
}

impl TcpPortGroupTarget {
    pub fn new(config: &ResolvedTcpConfig) -> Self {
        let port_list = config
            .ports
            .iter()
            .map(u16::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let identity = IdentityHasher::new()
            .field(&config.name)
            .field(&config.address)
            .field(port_list)
            .field(&config.channel)
            .field(config.severity.as_str())
            .finish();

        Self {
            name: config.name.clone(),
            address: config.address.clone(),
            timeout: config.timeout,
            identity,
            ports: Mutex::new(config.ports.iter().map(|&port| (port, true)).collect()),
        }
    }

    pub fn port_statuses(&self) -> Vec<PortStatus> {
        self.ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(&port, &open)| PortStatus { port, open })
            .collect()
    }

    async fn dial(&self, port: u16) -> bool {
        let connect = TcpStream::connect((self.address.as_str(), port));
        match tokio::time::timeout(self.timeout, connect).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                trace!(group = %self.name, port, "port is closed: {e}");
                false
            }
            Err(_) => {
                trace!(group = %self.name, port, "connection attempt timed out");
                false
            }
        }
    }
}

#[async_trait]
impl CheckTarget for TcpPortGroupTarget {
    type Status = Vec<PortStatus>;

    fn identity(&self) -> u64 {
        self.identity
    }

    fn describe(&self) -> String {
        format!("{} ({})", self.name, self.address)
    }

    fn status(&self) -> Vec<PortStatus> {
        self.port_statuses()
    }

    fn restore(&self, status: Vec<PortStatus>) {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        for PortStatus { port, open } in status {
            // ports no longer configured are dropped
            if let Some(current) = ports.get_mut(&port) {
                *current = open;
            }
        }
    }

    async fn check(&self) -> CheckOutcome {
        let ports: Vec<u16> = self
            .ports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();

        let results: Vec<(u16, bool)> = stream::iter(ports)
            .map(|port| async move { (port, self.dial(port).await) })
            .buffer_unordered(MAX_CONCURRENT_DIALS)
            .collect()
            .await;

        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        let mut changed = false;
        let mut dropped = false;
        for (port, open) in results {
            let previous = ports.insert(port, open).unwrap_or(true);
            if previous != open {
                changed = true;
                dropped |= !open;
            }
        }

        CheckOutcome {
            changed,
            alert: dropped.then(|| format!("TCP Ports of group '{}' are down.", self.name)),
        }
    }
}

pub type TcpPortGroupMonitor = Monitor<TcpPortGroupTarget>;

impl TcpPortGroupMonitor {
    pub async fn from_config(configs: &[ResolvedTcpConfig], context: &MonitorContext) -> Self {
        let items = configs
            .iter()
            .map(|config| {
                ScheduledItem::new(
                    TcpPortGroupTarget::new(config),
                    &config.channel,
                    config.severity,
                    config.interval,
                )
            })
            .collect();
        Monitor::start(STATE_KEY, items, context).await
    }
}
