//! Process-backed task monitor.

use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use osmon_core::{ProcessSnapshot, TaskDescriptor};
use osmon_protocol::{TaskProcessInfo, STATUS_NOT_RUNNING, STATUS_RUNNING};
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{MonitorError, MonitorState, RestartScheduler, StartupTiming, TaskMonitor};
use crate::process::{
    build_argv, command_line_matches, launch, read_pidfile, remove_pidfile, ProcessError,
    ProcessHandle,
};

/// Supervises one task through an OS process.
///
/// Mutating operations are serialized by an async mutex. The last status
/// is published through a watch channel so `describe` can answer while a
/// start is still polling for its pidfile.
pub struct ProcessMonitor {
    task: TaskDescriptor,
    timing: StartupTiming,
    restarts: RestartScheduler,
    this: Weak<ProcessMonitor>,
    inner: Mutex<MonitorInner>,
    view: watch::Sender<MonitorView>,
}

#[derive(Default)]
struct MonitorInner {
    handle: Option<ProcessHandle>,
    pending: Option<PendingRestart>,
    next_restart_id: u64,
    stopped: bool,
}

struct PendingRestart {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Default)]
struct MonitorView {
    state: MonitorState,
    snapshot: Option<ProcessSnapshot>,
}

enum PollOutcome {
    Alive,
    Gone,
    Detached,
}

impl ProcessMonitor {
    pub fn new(task: TaskDescriptor, timing: StartupTiming, restarts: RestartScheduler) -> Arc<Self> {
        let (view, _) = watch::channel(MonitorView::default());
        Arc::new_cyclic(|this| Self {
            task,
            timing,
            restarts,
            this: this.clone(),
            inner: Mutex::new(MonitorInner::default()),
            view,
        })
    }

    pub fn task(&self) -> &TaskDescriptor {
        &self.task
    }

    fn set_state(&self, state: MonitorState) {
        self.view.send_modify(|view| {
            view.state = state;
            if !state.has_process() {
                view.snapshot = None;
            }
        });
    }

    fn publish_running(&self, snapshot: ProcessSnapshot) {
        self.view.send_replace(MonitorView {
            state: MonitorState::Running,
            snapshot: Some(snapshot),
        });
    }

    fn cancel_pending(&self, inner: &mut MonitorInner) {
        if let Some(pending) = inner.pending.take() {
            debug!(task = %self.task.name, "Cancelling pending restart");
            pending.cancel.cancel();
        }
    }

    // ========================================================================
    // Start
    // ========================================================================

    async fn start_locked(&self, inner: &mut MonitorInner) -> Result<(), MonitorError> {
        inner.stopped = false;
        self.cancel_pending(inner);

        if let Some(handle) = inner.handle.as_mut() {
            match handle.sample() {
                Ok(snapshot) => {
                    debug!(task = %self.task.name, pid = snapshot.pid, "Process already running");
                    self.publish_running(snapshot);
                    return Ok(());
                }
                Err(_) => inner.handle = None,
            }
        }

        self.set_state(MonitorState::Starting);

        let handle = match self.launch_or_adopt().await {
            Ok(handle) => handle,
            Err(e) => {
                self.set_state(MonitorState::Crashed);
                return Err(e.into());
            }
        };
        inner.handle = Some(handle);

        match self.poll_locked(inner)? {
            PollOutcome::Alive => Ok(()),
            PollOutcome::Gone | PollOutcome::Detached => {
                self.set_state(MonitorState::Crashed);
                Err(ProcessError::ProcessNotFound(format!(
                    "{} exited right after start",
                    self.task.name
                ))
                .into())
            }
        }
    }

    async fn launch_or_adopt(&self) -> Result<ProcessHandle, ProcessError> {
        let argv = build_argv(&self.task)?;

        if let Some(pidfile) = self.task.pidfile.as_deref() {
            if let Some(handle) = self.try_adopt(pidfile, &argv) {
                return Ok(handle);
            }
        }

        let mut child = launch(&self.task, &argv)?;
        let launcher_pid = child.id();
        info!(task = %self.task.name, pid = ?launcher_pid, "Started process");

        let early_exit = tokio::time::timeout(self.timing.settle, child.wait()).await;

        let Some(pidfile) = self.task.pidfile.as_deref() else {
            return match early_exit {
                Err(_) => ProcessHandle::from_child(child),
                Ok(Ok(status)) => Err(ProcessError::ProcessNotFound(format!(
                    "{} exited during startup ({})",
                    self.task.name, status
                ))),
                Ok(Err(e)) => Err(ProcessError::Io(e.to_string())),
            };
        };

        if let Ok(Ok(status)) = early_exit {
            debug!(task = %self.task.name, status = %status, "Launcher exited");
        }

        match self.wait_for_pidfile(pidfile).await {
            Some(pid) if Some(pid) == launcher_pid => ProcessHandle::from_child(child),
            Some(pid) => ProcessHandle::attach(pid),
            None => {
                // Leave nothing unsupervised behind
                let _ = child.start_kill();
                Err(ProcessError::ProcessNotFound(format!(
                    "{} did not write pidfile {}",
                    self.task.name,
                    pidfile.display()
                )))
            }
        }
    }

    /// Adopts the process named by an existing pidfile if its command line
    /// belongs to this task. Stale or foreign pidfiles are removed.
    fn try_adopt(&self, pidfile: &Path, argv: &[String]) -> Option<ProcessHandle> {
        if !pidfile.exists() {
            return None;
        }

        let Some(pid) = read_pidfile(pidfile) else {
            remove_pidfile(pidfile);
            return None;
        };

        let mut handle = match ProcessHandle::attach(pid) {
            Ok(handle) => handle,
            Err(_) => {
                info!(task = %self.task.name, pid, "Pidfile is stale");
                remove_pidfile(pidfile);
                return None;
            }
        };

        match handle.cmdline() {
            Ok(cmdline) if command_line_matches(argv, &cmdline) => {
                info!(task = %self.task.name, pid, "Adopted running process");
                Some(handle)
            }
            Ok(cmdline) => {
                warn!(
                    task = %self.task.name,
                    pid,
                    expected = ?argv,
                    actual = ?cmdline,
                    "Pidfile points to an unrelated process"
                );
                remove_pidfile(pidfile);
                None
            }
            Err(_) => {
                remove_pidfile(pidfile);
                None
            }
        }
    }

    async fn wait_for_pidfile(&self, pidfile: &Path) -> Option<u32> {
        for attempt in 1..=self.timing.pidfile_attempts {
            if let Some(pid) = read_pidfile(pidfile) {
                return Some(pid);
            }
            info!(
                task = %self.task.name,
                pidfile = %pidfile.display(),
                attempt,
                "Waiting for pidfile"
            );
            tokio::time::sleep(self.timing.pidfile_interval).await;
        }
        read_pidfile(pidfile)
    }

    // ========================================================================
    // Monitor
    // ========================================================================

    fn poll_locked(&self, inner: &mut MonitorInner) -> Result<PollOutcome, MonitorError> {
        let Some(handle) = inner.handle.as_mut() else {
            return Ok(PollOutcome::Detached);
        };

        match handle.sample() {
            Ok(snapshot) => {
                self.cancel_pending(inner);
                self.publish_running(snapshot);
                Ok(PollOutcome::Alive)
            }
            Err(ProcessError::NoSuchProcess(pid)) => {
                warn!(task = %self.task.name, pid, "Process is gone");
                inner.handle = None;
                Ok(PollOutcome::Gone)
            }
            Err(e) => Err(MonitorError::Transient {
                task: self.task.name.clone(),
                reason: e.to_string(),
            }),
        }
    }

    fn arm_restart(&self, inner: &mut MonitorInner, delay: Duration) {
        let id = inner.next_restart_id;
        inner.next_restart_id += 1;

        let this = self.this.clone();
        let cancel = self.restarts.schedule(&self.task.name, delay, move || async move {
            if let Some(monitor) = this.upgrade() {
                monitor.run_scheduled_restart(id).await;
            }
        });

        match cancel {
            Some(cancel) => {
                inner.pending = Some(PendingRestart { id, cancel });
                self.set_state(MonitorState::PendingRestart);
                info!(
                    task = %self.task.name,
                    delay_secs = delay.as_secs(),
                    "Restart scheduled"
                );
            }
            None => self.set_state(MonitorState::Crashed),
        }
    }

    async fn run_scheduled_restart(&self, id: u64) {
        let mut inner = self.inner.lock().await;

        match inner.pending.as_ref() {
            Some(pending) if pending.id == id => inner.pending = None,
            _ => {
                debug!(task = %self.task.name, "Scheduled restart superseded");
                return;
            }
        }

        if inner.stopped {
            return;
        }

        info!(task = %self.task.name, "Restarting process");
        if let Err(e) = self.start_locked(&mut inner).await {
            error!(task = %self.task.name, error = %e, "Scheduled restart failed");
        }
    }
}

#[async_trait]
impl TaskMonitor for ProcessMonitor {
    fn name(&self) -> &str {
        &self.task.name
    }

    async fn start(&self) -> Result<(), MonitorError> {
        let mut inner = self.inner.lock().await;
        self.start_locked(&mut inner).await
    }

    async fn monitor(&self) -> Result<(), MonitorError> {
        let mut inner = self.inner.lock().await;

        if inner.stopped {
            debug!(task = %self.task.name, "Task stopped, not monitoring");
            return Ok(());
        }

        match self.poll_locked(&mut inner)? {
            PollOutcome::Alive => Ok(()),
            PollOutcome::Detached => {
                if inner.pending.is_some() {
                    debug!(task = %self.task.name, "Waiting for pending restart");
                } else {
                    info!(task = %self.task.name, "No process attached");
                }
                Ok(())
            }
            PollOutcome::Gone => match self.task.restart_after() {
                None => {
                    info!(task = %self.task.name, "Restarting process immediately");
                    self.set_state(MonitorState::Crashed);
                    self.start_locked(&mut inner).await
                }
                Some(delay) => {
                    self.arm_restart(&mut inner, delay);
                    Ok(())
                }
            },
        }
    }

    async fn stop(&self) -> Result<(), MonitorError> {
        let mut inner = self.inner.lock().await;
        inner.stopped = true;
        self.cancel_pending(&mut inner);

        let result = match inner.handle.take() {
            Some(mut handle) => {
                self.set_state(MonitorState::Stopping);
                info!(task = %self.task.name, pid = handle.pid(), "Stopping process");
                handle.kill().await
            }
            None => Ok(()),
        };

        self.set_state(MonitorState::Stopped);
        result.map_err(MonitorError::from)
    }

    fn describe(&self) -> TaskProcessInfo {
        let view = self.view.borrow();
        let status = if view.snapshot.is_some() {
            STATUS_RUNNING
        } else {
            STATUS_NOT_RUNNING
        };

        TaskProcessInfo {
            name: self.task.name.clone(),
            pidfile: self.task.pidfile_display(),
            status: status.to_string(),
            process: view.snapshot.clone(),
        }
    }

    fn state(&self) -> MonitorState {
        self.view.borrow().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quick_timing() -> StartupTiming {
        StartupTiming {
            settle: Duration::from_millis(100),
            pidfile_attempts: 2,
            pidfile_interval: Duration::from_millis(50),
        }
    }

    #[tokio::test]
    async fn test_describe_before_start() {
        let task = TaskDescriptor::new("idle", "/bin/sleep").with_pidfile("/tmp/idle.pid");
        let monitor = ProcessMonitor::new(task, quick_timing(), RestartScheduler::new());

        let info = monitor.describe();
        assert_eq!(info.name, "idle");
        assert_eq!(info.pidfile, "/tmp/idle.pid");
        assert_eq!(info.status, STATUS_NOT_RUNNING);
        assert!(info.process.is_none());
        assert_eq!(monitor.state(), MonitorState::Unstarted);
    }

    #[tokio::test]
    async fn test_start_failure_marks_crashed() {
        let task = TaskDescriptor::new("ghost", "/nonexistent/osmon-binary");
        let monitor = ProcessMonitor::new(task, quick_timing(), RestartScheduler::new());

        let err = monitor.start().await.unwrap_err();
        assert!(matches!(err, MonitorError::Process(ProcessError::NotFound(_))));
        assert_eq!(monitor.state(), MonitorState::Crashed);
        assert_eq!(monitor.describe().status, STATUS_NOT_RUNNING);
    }

    #[tokio::test]
    async fn test_stop_without_process() {
        let task = TaskDescriptor::new("idle", "/bin/sleep");
        let monitor = ProcessMonitor::new(task, quick_timing(), RestartScheduler::new());

        monitor.stop().await.unwrap();
        assert_eq!(monitor.state(), MonitorState::Stopped);
        monitor.monitor().await.unwrap();
        assert_eq!(monitor.state(), MonitorState::Stopped);
    }

    #[tokio::test]
    async fn test_early_exit_without_pidfile() {
        let task = TaskDescriptor::new("quick", "/bin/sh").with_arguments(["-c", "exit 3"]);
        let monitor = ProcessMonitor::new(task, quick_timing(), RestartScheduler::new());

        let err = monitor.start().await.unwrap_err();
        assert!(matches!(
            err,
            MonitorError::Process(ProcessError::ProcessNotFound(_))
        ));
        assert_eq!(monitor.state(), MonitorState::Crashed);
    }
}
