//! TCP port group behavior against real sockets
//!
//! Two ports of one group start closed, which raises a single group alert.
//! Opening one of them later only updates that port's persisted status.

use std::time::Duration;

use pretty_assertions::assert_eq;
use server_watchdog::config::ResolvedTcpConfig;
use server_watchdog::monitors::TcpPortGroupMonitor;
use server_watchdog::monitors::tcp::{PortStatus, STATE_KEY};
use server_watchdog::notify::Severity;
use server_watchdog::state::PersistedRecord;
use tokio::net::TcpListener;

use crate::helpers::{CHANNEL, TestEnv};

const INTERVAL: Duration = Duration::from_millis(100);

/// A local port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

fn group(ports: Vec<u16>) -> ResolvedTcpConfig {
    ResolvedTcpConfig {
        name: "edge".to_string(),
        address: "127.0.0.1".to_string(),
        ports,
        interval: INTERVAL,
        timeout: Duration::from_millis(500),
        channel: CHANNEL.to_string(),
        severity: Severity::Error,
    }
}

async fn persisted(env: &TestEnv) -> Vec<PortStatus> {
    let mut records = env
        .store
        .load::<PersistedRecord<Vec<PortStatus>>>(STATE_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(records.len(), 1);
    records.remove(0).status
}

#[tokio::test]
async fn test_group_alerts_once_and_tracks_ports_individually() {
    let env = TestEnv::new();
    let a = closed_port().await;
    let b = closed_port().await;
    let mut expected = vec![
        PortStatus { port: a, open: false },
        PortStatus { port: b, open: false },
    ];
    expected.sort_by_key(|status| status.port);

    let mut monitor = TcpPortGroupMonitor::from_config(&[group(vec![a, b])], &env.context()).await;
    monitor.run();

    assert!(env.sink.wait_for(1, Duration::from_secs(3)).await);
    tokio::time::sleep(INTERVAL * 3).await;
    assert_eq!(env.sink.messages(), vec!["TCP Ports of group 'edge' are down.".to_string()]);
    assert_eq!(persisted(&env).await, expected);

    let _listener = TcpListener::bind(("127.0.0.1", a)).await.unwrap();
    tokio::time::sleep(INTERVAL * 5).await;
    monitor.stop().await;

    for status in &mut expected {
        status.open = status.port == a;
    }
    assert_eq!(persisted(&env).await, expected);
    assert_eq!(monitor.items()[0].target().port_statuses(), expected);
    // reopening a port never notifies
    assert_eq!(env.sink.len(), 1);
}
