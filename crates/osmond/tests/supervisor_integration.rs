//! Integration tests for the supervisor loop.
//!
//! Each test runs a Supervisor on an ephemeral port with an in-memory
//! configuration loader and drives it through the control channel.

#![cfg(unix)]

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use osmon_core::{ConfigError, ConfigLoader, ConfigResult, Configuration, TaskDescriptor};
use osmon_protocol::{Action, ControlRequest, ControlResponse, FrameCodec};
use osmond::monitor::StartupTiming;
use osmond::supervisor::Supervisor;
use tempfile::TempDir;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};

// ============================================================================
// Constants
// ============================================================================

/// Upper bound for the supervisor to react to a request
const REACTION_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

// ============================================================================
// Test Helpers
// ============================================================================

/// Loader whose configuration can be swapped (or broken) between reloads.
struct SwappableLoader {
    config: Mutex<Option<Configuration>>,
}

impl SwappableLoader {
    fn new(config: Configuration) -> Arc<Self> {
        Arc::new(Self {
            config: Mutex::new(Some(config)),
        })
    }

    fn replace(&self, config: Option<Configuration>) {
        *self.config.lock().unwrap() = config;
    }
}

impl ConfigLoader for SwappableLoader {
    fn load(&self) -> ConfigResult<Configuration> {
        self.config
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| ConfigError::Invalid("configuration unavailable".into()))
    }
}

/// A shell script that records its own PID and keeps running as `sh`.
fn pidfile_task(dir: &Path, name: &str) -> (TaskDescriptor, PathBuf) {
    let script = dir.join(format!("{}.sh", name));
    let pidfile = dir.join(format!("{}.pid", name));
    std::fs::write(
        &script,
        "echo $$ > \"$1\"\nwhile true; do sleep 1; done\n",
    )
    .unwrap();

    let task = TaskDescriptor::new(name, &script)
        .with_arguments([pidfile.display().to_string()])
        .with_pidfile(&pidfile)
        .with_restart_delay(1);
    (task, pidfile)
}

fn config_with(tasks: Vec<TaskDescriptor>) -> Configuration {
    Configuration {
        monitor_interval: 1,
        listen: "127.0.0.1:0".parse().unwrap(),
        processes: tasks,
        ..Configuration::default()
    }
}

struct TestSupervisor {
    supervisor: Arc<Supervisor>,
    listening: watch::Receiver<Option<SocketAddr>>,
    task: JoinHandle<()>,
    _dir: TempDir,
}

impl TestSupervisor {
    fn spawn(loader: Arc<SwappableLoader>, dir: TempDir) -> Self {
        let timing = StartupTiming {
            settle: Duration::from_millis(200),
            pidfile_attempts: 20,
            pidfile_interval: Duration::from_millis(100),
        };
        let supervisor = Arc::new(Supervisor::new(loader).with_timing(timing));
        let listening = supervisor.listening();

        let runner = Arc::clone(&supervisor);
        let task = tokio::spawn(async move {
            runner.run().await.expect("supervisor run");
        });

        Self {
            supervisor,
            listening,
            task,
            _dir: dir,
        }
    }

    async fn addr(&mut self) -> SocketAddr {
        timeout(REACTION_TIMEOUT, async {
            loop {
                if let Some(addr) = *self.listening.borrow_and_update() {
                    return addr;
                }
                self.listening.changed().await.unwrap();
            }
        })
        .await
        .expect("control server listening")
    }

    async fn request(&mut self, action: Action) -> ControlResponse {
        let addr = self.addr().await;
        let codec = FrameCodec::new();
        let mut stream = TcpStream::connect(addr).await.unwrap();
        codec
            .write(&mut stream, &ControlRequest::new(action))
            .await
            .unwrap();
        timeout(REACTION_TIMEOUT, codec.read(&mut stream))
            .await
            .unwrap()
            .unwrap()
    }

    /// Polls status until the named task reports a PID.
    async fn wait_running(&mut self, name: &str) -> u32 {
        let deadline = tokio::time::Instant::now() + REACTION_TIMEOUT;
        loop {
            let status = self.request(Action::Status).await;
            let pid = status
                .parameters
                .iter()
                .find(|p| p.name == name)
                .and_then(|p| p.process.as_ref())
                .map(|p| p.pid);
            if let Some(pid) = pid {
                return pid;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "task {} never reported running",
                name
            );
            sleep(POLL_INTERVAL).await;
        }
    }

    /// Waits until a RESTART/RELOAD has been consumed.
    async fn wait_flags_cleared(&self) {
        timeout(REACTION_TIMEOUT, async {
            while !self.supervisor.signals().current().is_empty() {
                sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .expect("flags consumed");
    }

    async fn stop(mut self) {
        let response = self.request(Action::Stop).await;
        assert!(response.status);
        timeout(REACTION_TIMEOUT, self.task)
            .await
            .expect("supervisor stops")
            .expect("supervisor task");
    }
}

fn pid_alive(pid: u32) -> bool {
    // SAFETY: signal 0 only checks for existence
    unsafe { libc::kill(pid as libc::pid_t, 0) == 0 }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_stop_request_ends_supervisor_and_kills_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let (task, _pidfile) = pidfile_task(dir.path(), "web");
    let loader = SwappableLoader::new(config_with(vec![task]));

    let mut supervisor = TestSupervisor::spawn(loader, dir);
    let pid = supervisor.wait_running("web").await;
    assert!(pid_alive(pid));

    supervisor.stop().await;
    sleep(Duration::from_millis(100)).await;
    assert!(!pid_alive(pid));
}

#[tokio::test]
async fn test_reload_keeps_running_process() {
    let dir = tempfile::tempdir().unwrap();
    let (task, _pidfile) = pidfile_task(dir.path(), "web");
    let loader = SwappableLoader::new(config_with(vec![task]));

    let mut supervisor = TestSupervisor::spawn(loader, dir);
    let before = supervisor.wait_running("web").await;

    let response = supervisor.request(Action::Reload).await;
    assert_eq!(response.message, "Reload requested");
    supervisor.wait_flags_cleared().await;

    // The new registry adopts the process through its pidfile
    let after = supervisor.wait_running("web").await;
    assert_eq!(before, after);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_restart_replaces_process() {
    let dir = tempfile::tempdir().unwrap();
    let (task, _pidfile) = pidfile_task(dir.path(), "web");
    let loader = SwappableLoader::new(config_with(vec![task]));

    let mut supervisor = TestSupervisor::spawn(loader, dir);
    let before = supervisor.wait_running("web").await;

    let response = supervisor.request(Action::Restart).await;
    assert_eq!(response.message, "Restart requested");
    supervisor.wait_flags_cleared().await;

    let after = supervisor.wait_running("web").await;
    assert_ne!(before, after);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_reload_picks_up_new_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let (web, _) = pidfile_task(dir.path(), "web");
    let (worker, _) = pidfile_task(dir.path(), "worker");
    let loader = SwappableLoader::new(config_with(vec![web.clone()]));

    let mut supervisor = TestSupervisor::spawn(Arc::clone(&loader), dir);
    supervisor.wait_running("web").await;

    loader.replace(Some(config_with(vec![web, worker])));
    supervisor.request(Action::Reload).await;
    supervisor.wait_flags_cleared().await;

    supervisor.wait_running("worker").await;
    let status = supervisor.request(Action::Status).await;
    let names: Vec<_> = status.parameters.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["web", "worker"]);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_configuration() {
    let dir = tempfile::tempdir().unwrap();
    let (task, _) = pidfile_task(dir.path(), "web");
    let loader = SwappableLoader::new(config_with(vec![task]));

    let mut supervisor = TestSupervisor::spawn(Arc::clone(&loader), dir);
    let before = supervisor.wait_running("web").await;

    loader.replace(None);
    supervisor.request(Action::Reload).await;
    supervisor.wait_flags_cleared().await;

    let after = supervisor.wait_running("web").await;
    assert_eq!(before, after);

    supervisor.stop().await;
}

#[tokio::test]
async fn test_crashed_task_restarted_by_monitor_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let (task, _) = pidfile_task(dir.path(), "web");
    let loader = SwappableLoader::new(config_with(vec![task]));

    let mut supervisor = TestSupervisor::spawn(loader, dir);
    let before = supervisor.wait_running("web").await;

    // SAFETY: plain kill(2) on the supervised shell
    unsafe { libc::kill(before as libc::pid_t, libc::SIGKILL) };

    // monitor interval 1s + restart delay 1s
    let deadline = tokio::time::Instant::now() + REACTION_TIMEOUT;
    loop {
        let pid = supervisor.wait_running("web").await;
        if pid != before {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "task never restarted");
        sleep(Duration::from_millis(200)).await;
    }

    supervisor.stop().await;
}

#[tokio::test]
async fn test_initial_configuration_error_is_fatal() {
    let loader = Arc::new(SwappableLoader {
        config: Mutex::new(None),
    });
    let supervisor = Supervisor::new(loader);

    let result = timeout(REACTION_TIMEOUT, supervisor.run()).await.unwrap();
    assert!(result.is_err());
}
