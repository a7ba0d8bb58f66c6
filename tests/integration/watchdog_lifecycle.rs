//! Full watchdog lifecycle from settings to shutdown

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use server_watchdog::config::Config;
use server_watchdog::{Probes, Watchdog};

use crate::helpers::{FakeDisk, FakeProcesses};

fn log_contents(dir: &std::path::Path) -> String {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return String::new();
    };
    entries
        .filter_map(|entry| std::fs::read_to_string(entry.ok()?.path()).ok())
        .collect()
}

#[tokio::test]
async fn test_low_disk_alert_reaches_log_file() {
    let dir = tempfile::tempdir().unwrap();
    let config: Config = serde_json::from_value(json!({
        "server": { "port": 8080, "api_key": "secret" },
        "state_dir": "state",
        "channels": { "ops": { "file": {} } },
        "free_disk_space": [
            { "device": "/data", "minimum_free": "500", "interval": "1m", "channel": "ops" }
        ]
    }))
    .unwrap();

    let disk = FakeDisk::new(10);
    let resolved = config.resolve(dir.path(), disk.as_ref()).unwrap();
    let probes = Probes {
        disks: disk,
        processes: Arc::new(FakeProcesses::default()),
    };

    let mut watchdog = Watchdog::start_with(resolved, probes).await.unwrap();
    watchdog.run().await;

    let logs = dir.path().join("logs").join("ops");
    let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
    while !log_contents(&logs).contains("Disk space on '/data' is low.")
        && tokio::time::Instant::now() < deadline
    {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    watchdog.stop().await;

    let content = log_contents(&logs);
    assert!(content.contains("[ERROR] - Disk space on '/data' is low."));
    assert!(watchdog.store().path_for("diskcheck").exists());
}
