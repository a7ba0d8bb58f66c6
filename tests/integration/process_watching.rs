//! Integration tests for process watching
//!
//! These tests verify that:
//! - Discovery rules add matching root processes
//! - A watched process that exits raises a notification
//! - An explicit unwatch is not undone by discovery
//! - Processes that died while the daemon was down are reported on start
//! - Threads of a matching process are never watched on their own

use std::sync::Arc;
use std::time::Duration;

use server_watchdog::config::ResolvedProcessRule;
use server_watchdog::monitors::process::{ProcessMonitor, ProcessProbe, ProcessWatchEntry, STATE_KEY};
use server_watchdog::monitors::{ProcessError, SysinfoProcesses};
use server_watchdog::notify::Severity;

use crate::helpers::{CHANNEL, FakeProcesses, TestEnv};

fn rule(name: &str, executable: &str) -> ResolvedProcessRule {
    ResolvedProcessRule {
        name: name.to_string(),
        executable: glob::Pattern::new(executable).unwrap(),
        args: None,
        include_children: false,
        channel: CHANNEL.to_string(),
        severity: Severity::Error,
    }
}

fn pids(entries: &[ProcessWatchEntry]) -> Vec<u32> {
    entries.iter().map(|entry| entry.pid).collect()
}

#[tokio::test]
async fn test_discovered_process_death_is_reported() {
    let env = TestEnv::new();
    let processes = Arc::new(FakeProcesses::default());
    processes.spawn(1, None, "init", "");
    processes.spawn(100, Some(1), "nginx", "-g daemon off;");
    processes.spawn(101, Some(100), "nginx", "");

    let probe: Arc<dyn ProcessProbe> = processes.clone();
    let monitor = ProcessMonitor::start(vec![rule("Web server", "nginx")], probe, &env.context()).await;

    monitor.poll_once().await;
    assert_eq!(pids(&monitor.entries().await), vec![100]);

    processes.kill(101);
    processes.kill(100);
    monitor.poll_once().await;

    assert!(monitor.entries().await.is_empty());
    assert!(env.sink.wait_for(1, Duration::from_secs(2)).await);
    assert_eq!(
        env.sink.messages(),
        vec!["The process \"Web server\" (#100) has died.".to_string()]
    );
}

#[tokio::test]
async fn test_unwatch_is_not_undone_by_discovery() {
    let env = TestEnv::new();
    let processes = Arc::new(FakeProcesses::default());
    processes.spawn(200, None, "worker", "");

    let monitor =
        ProcessMonitor::start(vec![rule("Worker", "work*")], processes.clone(), &env.context()).await;
    monitor.poll_once().await;
    assert_eq!(pids(&monitor.entries().await), vec![200]);

    assert!(monitor.remove_process(200, CHANNEL).await);
    monitor.poll_once().await;
    monitor.poll_once().await;
    assert!(monitor.entries().await.is_empty());
    assert!(!monitor.remove_process(200, CHANNEL).await);
}

#[tokio::test]
async fn test_death_while_down_is_reported_on_start() {
    let env = TestEnv::new();
    let processes = Arc::new(FakeProcesses::default());
    processes.spawn(300, None, "postgres", "");
    processes.spawn(301, None, "redis", "");

    let monitor = ProcessMonitor::start(vec![], processes.clone(), &env.context()).await;
    assert!(
        monitor
            .add_process(300, Some("db".to_string()), Severity::Warn, CHANNEL)
            .await
            .unwrap()
    );
    assert!(monitor.add_process(301, None, Severity::Warn, CHANNEL).await.unwrap());
    monitor.stop().await;

    processes.kill(300);
    processes.kill(301);
    let env = TestEnv::in_dir(env.dir);
    let monitor = ProcessMonitor::start(vec![], processes.clone(), &env.context()).await;

    assert!(monitor.entries().await.is_empty());
    assert!(env.sink.wait_for(2, Duration::from_secs(2)).await);
    let mut messages = env.sink.messages();
    messages.sort();
    assert_eq!(
        messages,
        vec![
            "The process \"db\" (#300) has died while the server watcher was down.".to_string(),
            "The process #301 has died while the server watcher was down.".to_string(),
        ]
    );

    let saved = env.store.load::<ProcessWatchEntry>(STATE_KEY).await.unwrap();
    assert_eq!(saved, Some(vec![]));
}

#[tokio::test]
async fn test_add_process_validation() {
    let env = TestEnv::new();
    let processes = Arc::new(FakeProcesses::default());
    processes.spawn(42, None, "app", "");
    let monitor = ProcessMonitor::start(vec![], processes, &env.context()).await;

    assert!(matches!(
        monitor.add_process(43, None, Severity::Error, CHANNEL).await,
        Err(ProcessError::NotFound(43))
    ));
    assert!(matches!(
        monitor.add_process(42, None, Severity::Error, "nowhere").await,
        Err(ProcessError::UnknownChannel(_))
    ));

    assert!(monitor.add_process(42, None, Severity::Error, "OPS").await.unwrap());
    // same pid and channel again is a no-op
    assert!(!monitor.add_process(42, None, Severity::Error, CHANNEL).await.unwrap());
    assert_eq!(pids(&monitor.entries().await), vec![42]);
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_threads_are_not_discovered_as_processes() {
    let env = TestEnv::new();
    let exe = std::env::current_exe().unwrap();
    let exe_name = exe.file_name().unwrap().to_string_lossy().to_string();
    let mut own = rule("Test runner", &glob::Pattern::escape(&exe_name));
    own.include_children = true;

    let monitor = ProcessMonitor::start(
        vec![own],
        Arc::new(SysinfoProcesses::new()),
        &env.context(),
    )
    .await;

    let (release, parked) = std::sync::mpsc::channel::<()>();
    let worker = std::thread::spawn(move || {
        let _ = parked.recv();
    });
    monitor.poll_once().await;
    assert_eq!(pids(&monitor.entries().await), vec![std::process::id()]);

    release.send(()).unwrap();
    worker.join().unwrap();
    let worker = std::thread::spawn(|| std::thread::sleep(Duration::from_millis(200)));
    monitor.poll_once().await;
    worker.join().unwrap();

    assert_eq!(pids(&monitor.entries().await), vec![std::process::id()]);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(env.sink.len(), 0);
}
