//! Integration tests for ProcessMonitor against real OS processes.
//!
//! Uses `/bin/sleep` as the supervised program and `/bin/sh` for tasks
//! that daemonize and write their own pidfile.

#![cfg(unix)]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use osmon_core::TaskDescriptor;
use osmon_protocol::{STATUS_NOT_RUNNING, STATUS_RUNNING};
use osmond::monitor::{
    MonitorError, MonitorState, ProcessMonitor, RestartScheduler, StartupTiming, TaskMonitor,
};
use osmond::process::ProcessError;
use tokio::time::sleep;

// ============================================================================
// Test Helpers
// ============================================================================

fn quick_timing() -> StartupTiming {
    StartupTiming {
        settle: Duration::from_millis(200),
        pidfile_attempts: 10,
        pidfile_interval: Duration::from_millis(100),
    }
}

fn sleeper(name: &str, restart_delay: u64) -> TaskDescriptor {
    TaskDescriptor::new(name, "/bin/sleep")
        .with_arguments(["100"])
        .with_restart_delay(restart_delay)
}

fn running_pid(monitor: &ProcessMonitor) -> u32 {
    let info = monitor.describe();
    assert_eq!(info.status, STATUS_RUNNING, "task {} not running", info.name);
    info.process.expect("snapshot while running").pid
}

/// Kills a process behind the monitor's back.
fn kill_externally(pid: u32) {
    // SAFETY: plain kill(2) on a PID this test spawned
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGKILL) };
    assert_eq!(rc, 0, "kill({}) failed", pid);
}

fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

/// Spawns `/bin/sleep <secs>` outside the monitor and writes its pidfile.
fn spawn_foreign_sleep(secs: &str, pidfile: &Path) -> std::process::Child {
    let child = std::process::Command::new("/bin/sleep")
        .arg(secs)
        .spawn()
        .expect("spawn sleep");
    std::fs::write(pidfile, format!("{}\n", child.id())).unwrap();
    child
}

// ============================================================================
// Spawning
// ============================================================================

#[tokio::test]
async fn test_start_spawns_and_describes() {
    let monitor = ProcessMonitor::new(sleeper("web", 5), quick_timing(), RestartScheduler::new());

    monitor.start().await.unwrap();

    assert_eq!(monitor.state(), MonitorState::Running);
    let info = monitor.describe();
    assert_eq!(info.name, "web");
    assert_eq!(info.pidfile, "");
    let snapshot = info.process.expect("snapshot");
    assert_eq!(snapshot.cmdline, vec!["/bin/sleep", "100"]);
    assert!(!snapshot.is_defunct());

    monitor.stop().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Stopped);
    assert_eq!(monitor.describe().status, STATUS_NOT_RUNNING);
    assert!(!pid_alive(snapshot.pid));
}

#[tokio::test]
async fn test_start_twice_keeps_running_process() {
    let monitor = ProcessMonitor::new(sleeper("web", 5), quick_timing(), RestartScheduler::new());

    monitor.start().await.unwrap();
    let first = running_pid(&monitor);
    monitor.start().await.unwrap();
    assert_eq!(running_pid(&monitor), first);

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_is_idempotent() {
    let monitor = ProcessMonitor::new(sleeper("web", 5), quick_timing(), RestartScheduler::new());
    monitor.start().await.unwrap();

    monitor.stop().await.unwrap();
    monitor.stop().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn test_not_executable() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("program");
    std::fs::write(&path, b"#!/bin/sh\nsleep 100\n").unwrap();

    let monitor = ProcessMonitor::new(
        TaskDescriptor::new("plain", &path),
        quick_timing(),
        RestartScheduler::new(),
    );

    let err = monitor.start().await.unwrap_err();
    assert!(matches!(
        err,
        MonitorError::Process(ProcessError::NotExecutable(_))
    ));
    assert_eq!(monitor.describe().status, STATUS_NOT_RUNNING);
}

#[tokio::test]
async fn test_shell_script_runs_through_interpreter() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("worker.sh");
    // Not executable on purpose: scripts run through /bin/sh
    std::fs::write(&script, b"exec sleep 100\n").unwrap();

    let monitor = ProcessMonitor::new(
        TaskDescriptor::new("worker", &script),
        quick_timing(),
        RestartScheduler::new(),
    );

    monitor.start().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Running);
    monitor.stop().await.unwrap();
}

#[cfg(target_os = "linux")]
#[tokio::test]
async fn test_task_runs_in_configured_directory() {
    let dir = tempfile::tempdir().unwrap();
    let mut task = sleeper("web", 5);
    task.cwd = Some(dir.path().to_path_buf());
    let monitor = ProcessMonitor::new(task, quick_timing(), RestartScheduler::new());

    monitor.start().await.unwrap();

    let snapshot = monitor.describe().process.expect("snapshot");
    assert_eq!(
        snapshot.cwd.map(|p| p.canonicalize().unwrap()),
        Some(dir.path().canonicalize().unwrap())
    );

    monitor.stop().await.unwrap();
}

// ============================================================================
// Pidfiles
// ============================================================================

#[tokio::test]
async fn test_daemonizing_task_found_through_pidfile() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("daemon.pid");
    let command = format!("sleep 100 & echo $! > {}", pidfile.display());

    let task = TaskDescriptor::new("daemon", "/bin/sh")
        .with_arguments(["-c", command.as_str()])
        .with_pidfile(&pidfile);
    let monitor = ProcessMonitor::new(task, quick_timing(), RestartScheduler::new());

    monitor.start().await.unwrap();

    let pid = running_pid(&monitor);
    let written: u32 = std::fs::read_to_string(&pidfile)
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(pid, written);
    assert_eq!(monitor.describe().pidfile, pidfile.display().to_string());

    monitor.stop().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::Stopped);
}

#[tokio::test]
async fn test_matching_pidfile_is_adopted() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("web.pid");
    let mut foreign = spawn_foreign_sleep("100", &pidfile);

    let task = sleeper("web", 5).with_pidfile(&pidfile);
    let monitor = ProcessMonitor::new(task, quick_timing(), RestartScheduler::new());

    monitor.start().await.unwrap();
    assert_eq!(running_pid(&monitor), foreign.id());

    // Adopting again must not spawn anything new
    monitor.start().await.unwrap();
    assert_eq!(running_pid(&monitor), foreign.id());

    monitor.stop().await.unwrap();
    let status = foreign.wait().unwrap();
    assert!(!status.success());
}

#[tokio::test]
async fn test_foreign_pidfile_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("web.pid");
    let mut foreign = spawn_foreign_sleep("200", &pidfile);

    let timing = StartupTiming {
        settle: Duration::from_millis(100),
        pidfile_attempts: 2,
        pidfile_interval: Duration::from_millis(50),
    };
    let task = sleeper("web", 5).with_pidfile(&pidfile);
    let monitor = ProcessMonitor::new(task, timing, RestartScheduler::new());

    // `sleep 100` never writes the pidfile, so the start fails after the
    // stale one has been removed
    let err = monitor.start().await.unwrap_err();
    assert!(matches!(
        err,
        MonitorError::Process(ProcessError::ProcessNotFound(_))
    ));
    assert!(!pidfile.exists());
    assert_eq!(monitor.state(), MonitorState::Crashed);

    // The unrelated process is left alone
    assert!(pid_alive(foreign.id()));
    foreign.kill().unwrap();
    foreign.wait().unwrap();
}

#[tokio::test]
async fn test_stale_pidfile_is_removed() {
    let dir = tempfile::tempdir().unwrap();
    let pidfile = dir.path().join("web.pid");
    let command = format!("echo $$ > {}; exec sleep 100", pidfile.display());

    let mut finished = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = finished.id();
    finished.wait().unwrap();
    std::fs::write(&pidfile, dead_pid.to_string()).unwrap();

    let task = TaskDescriptor::new("web", "/bin/sh")
        .with_arguments(["-c", command.as_str()])
        .with_pidfile(&pidfile);
    let monitor = ProcessMonitor::new(task, quick_timing(), RestartScheduler::new());

    monitor.start().await.unwrap();
    let pid = running_pid(&monitor);
    assert_ne!(pid, dead_pid);

    monitor.stop().await.unwrap();
}

// ============================================================================
// Restarts
// ============================================================================

#[tokio::test]
async fn test_immediate_restart_within_monitor_call() {
    let monitor = ProcessMonitor::new(sleeper("web", 0), quick_timing(), RestartScheduler::new());
    monitor.start().await.unwrap();
    let first = running_pid(&monitor);

    kill_externally(first);
    sleep(Duration::from_millis(100)).await;

    monitor.monitor().await.unwrap();

    let second = running_pid(&monitor);
    assert_ne!(first, second);
    assert_eq!(monitor.state(), MonitorState::Running);

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn test_monitor_after_failed_start_does_not_respawn() {
    let dir = tempfile::tempdir().unwrap();
    let spawns = dir.path().join("spawns");
    let command = format!("echo x >> {}; exit 3", spawns.display());
    let task = TaskDescriptor::new("flaky", "/bin/sh").with_arguments(["-c", command.as_str()]);
    let restarts = RestartScheduler::new();
    let monitor = ProcessMonitor::new(task, quick_timing(), restarts.clone());

    assert!(monitor.start().await.is_err());
    monitor.monitor().await.unwrap();
    monitor.monitor().await.unwrap();

    let count = std::fs::read_to_string(&spawns).unwrap().lines().count();
    assert_eq!(count, 1);
    assert_eq!(monitor.state(), MonitorState::Crashed);
    assert_eq!(monitor.describe().status, STATUS_NOT_RUNNING);
    assert_eq!(restarts.pending(), 0);
}

#[tokio::test]
async fn test_delayed_restart_scenario() {
    let restarts = RestartScheduler::new();
    let monitor = ProcessMonitor::new(sleeper("web", 1), quick_timing(), restarts.clone());
    monitor.start().await.unwrap();
    let first = running_pid(&monitor);

    kill_externally(first);
    sleep(Duration::from_millis(100)).await;

    monitor.monitor().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::PendingRestart);
    assert_eq!(monitor.describe().status, STATUS_NOT_RUNNING);
    assert_eq!(restarts.pending(), 1);

    // A second cycle before the timer fires must not arm another restart
    monitor.monitor().await.unwrap();
    assert_eq!(restarts.pending(), 1);
    assert_eq!(monitor.describe().status, STATUS_NOT_RUNNING);

    sleep(Duration::from_millis(1600)).await;

    let second = running_pid(&monitor);
    assert_ne!(first, second);
    assert_eq!(restarts.pending(), 0);

    monitor.stop().await.unwrap();
}

#[tokio::test]
async fn test_stop_cancels_pending_restart() {
    let restarts = RestartScheduler::new();
    let monitor = ProcessMonitor::new(sleeper("web", 1), quick_timing(), restarts.clone());
    monitor.start().await.unwrap();

    kill_externally(running_pid(&monitor));
    sleep(Duration::from_millis(100)).await;
    monitor.monitor().await.unwrap();
    assert_eq!(monitor.state(), MonitorState::PendingRestart);

    monitor.stop().await.unwrap();
    sleep(Duration::from_millis(1500)).await;

    assert_eq!(monitor.state(), MonitorState::Stopped);
    assert!(monitor.describe().process.is_none());
    assert_eq!(restarts.pending(), 0);
}

#[tokio::test]
async fn test_scheduler_shutdown_drops_pending_restart() {
    let restarts = RestartScheduler::new();
    let monitor: Arc<ProcessMonitor> =
        ProcessMonitor::new(sleeper("web", 30), quick_timing(), restarts.clone());
    monitor.start().await.unwrap();

    kill_externally(running_pid(&monitor));
    sleep(Duration::from_millis(100)).await;
    monitor.monitor().await.unwrap();
    assert_eq!(restarts.pending(), 1);

    tokio::time::timeout(Duration::from_secs(2), restarts.shutdown())
        .await
        .expect("pending restarts are cancelled, not awaited");
    assert_eq!(restarts.pending(), 0);
    assert_eq!(monitor.describe().status, STATUS_NOT_RUNNING);
}
