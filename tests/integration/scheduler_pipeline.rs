//! End-to-end tests of the check scheduler
//!
//! These tests run a real disk space monitor against a fake disk and verify
//! that:
//! - An unhealthy transition raises exactly one notification
//! - Recovery is silent but persisted
//! - Nothing is checked after stop

use std::sync::Arc;
use std::time::Duration;

use server_watchdog::engine::Health;
use server_watchdog::monitors::disk::{DiskSpaceProbe, STATE_KEY};
use server_watchdog::monitors::DiskSpaceMonitor;
use server_watchdog::notify::Severity;
use server_watchdog::state::PersistedRecord;

use crate::helpers::{CHANNEL, FakeDisk, TestEnv, disk_config};

const INTERVAL: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_low_disk_alerts_once_and_recovers_silently() {
    let env = TestEnv::new();
    let disk = FakeDisk::new(10);
    let probe: Arc<dyn DiskSpaceProbe> = disk.clone();

    let mut monitor =
        DiskSpaceMonitor::from_config(&[disk_config("/data", 100, INTERVAL)], probe, &env.context())
            .await;
    monitor.run();

    assert!(env.sink.wait_for(1, Duration::from_secs(2)).await);
    // several more intervals while still low
    tokio::time::sleep(INTERVAL * 4).await;

    let events = env.sink.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].message, "Disk space on '/data' is low.");
    assert_eq!(events[0].channel, CHANNEL);
    assert_eq!(events[0].severity, Severity::Warn);

    disk.set_available(500);
    tokio::time::sleep(INTERVAL * 4).await;
    monitor.stop().await;

    assert_eq!(env.sink.len(), 1);
    assert_eq!(monitor.items()[0].target().health(), Health::Healthy);

    let saved = env
        .store
        .load::<PersistedRecord<Health>>(STATE_KEY)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].status, Health::Healthy);
}

#[tokio::test]
async fn test_no_checks_after_stop() {
    let env = TestEnv::new();
    let disk = FakeDisk::new(500);

    let mut monitor = DiskSpaceMonitor::from_config(
        &[disk_config("/data", 100, INTERVAL)],
        disk.clone(),
        &env.context(),
    )
    .await;
    monitor.run();
    tokio::time::sleep(INTERVAL * 2).await;
    monitor.stop().await;

    disk.set_available(0);
    tokio::time::sleep(INTERVAL * 3).await;

    assert_eq!(env.sink.len(), 0);
    assert_eq!(monitor.items()[0].target().health(), Health::Healthy);
}

#[tokio::test]
async fn test_empty_monitor_stops_promptly() {
    let env = TestEnv::new();
    let mut monitor =
        DiskSpaceMonitor::from_config(&[], FakeDisk::new(0), &env.context()).await;
    monitor.run();

    tokio::time::timeout(Duration::from_secs(1), monitor.stop())
        .await
        .expect("stop should not hang");
}
