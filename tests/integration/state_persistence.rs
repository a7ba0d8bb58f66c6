//! Integration tests for state persistence across restarts
//!
//! These tests verify that:
//! - Item status survives a restart and suppresses a repeated alert
//! - Items whose configuration changed start out healthy
//! - A corrupt state file is ignored

use std::time::Duration;

use server_watchdog::engine::Health;
use server_watchdog::monitors::DiskSpaceMonitor;
use server_watchdog::monitors::disk::STATE_KEY;

use crate::helpers::{FakeDisk, TestEnv, disk_config};

const INTERVAL: Duration = Duration::from_millis(100);

#[tokio::test]
async fn test_unhealthy_status_survives_restart() {
    let env = TestEnv::new();
    let disk = FakeDisk::new(10);
    let configs = [disk_config("/data", 100, INTERVAL)];

    let mut monitor = DiskSpaceMonitor::from_config(&configs, disk.clone(), &env.context()).await;
    monitor.run();
    assert!(env.sink.wait_for(1, Duration::from_secs(2)).await);
    monitor.stop().await;

    // restart on the same state directory
    let env = TestEnv::in_dir(env.dir);
    let mut monitor = DiskSpaceMonitor::from_config(&configs, disk.clone(), &env.context()).await;
    assert_eq!(monitor.items()[0].target().health(), Health::Unhealthy);

    monitor.run();
    tokio::time::sleep(INTERVAL * 4).await;
    monitor.stop().await;

    // still low, so no second alert
    assert_eq!(env.sink.len(), 0);
}

#[tokio::test]
async fn test_changed_items_start_healthy() {
    let env = TestEnv::new();
    let disk = FakeDisk::new(10);

    let mut monitor = DiskSpaceMonitor::from_config(
        &[disk_config("/data", 100, INTERVAL)],
        disk.clone(),
        &env.context(),
    )
    .await;
    monitor.run();
    assert!(env.sink.wait_for(1, Duration::from_secs(2)).await);
    monitor.stop().await;

    let env = TestEnv::in_dir(env.dir);
    let monitor = DiskSpaceMonitor::from_config(
        &[
            disk_config("/srv", 100, INTERVAL),
            disk_config("/data", 100, INTERVAL),
        ],
        disk,
        &env.context(),
    )
    .await;

    // matched by identity, not by position
    assert_eq!(monitor.items()[0].target().health(), Health::Healthy);
    assert_eq!(monitor.items()[1].target().health(), Health::Unhealthy);
}

#[tokio::test]
async fn test_corrupt_state_is_ignored() {
    let env = TestEnv::new();
    let path = env.store.path_for(STATE_KEY);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"not a state file").unwrap();

    let monitor = DiskSpaceMonitor::from_config(
        &[disk_config("/data", 100, INTERVAL)],
        FakeDisk::new(500),
        &env.context(),
    )
    .await;

    assert_eq!(monitor.items()[0].target().health(), Health::Healthy);
}
