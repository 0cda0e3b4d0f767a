//! Per-task supervision.
//!
//! Every configured task is driven by one `TaskMonitor`. The supervisor
//! only talks to the trait, so the platform-specific monitor is chosen
//! once in `create_monitor` and never branched on again.
//!
//! # State machine
//!
//! ```text
//!              start()                 poll ok
//! Unstarted ─────────▶ Starting ─────────────────▶ Running ◀─┐
//!                         │ error                     │      │ poll ok
//!                         ▼                           │      │
//!                     Crashed ◀── gone, delay 0 ──────┤──────┘
//!                   (restarted inline;                │
//!                    a failed start stays here        │ gone, delay > 0
//!                    until the next start())          ▼
//!                                               PendingRestart
//!                                                     │ timer fires
//!                                                     ▼
//!                                                  Starting
//!
//!  Stopped ◀── Stopping ◀── stop() (from any state)
//! ```
//!
//! `monitor()` without an attached process does nothing.

mod process_monitor;
mod restart;

pub use process_monitor::ProcessMonitor;
pub use restart::RestartScheduler;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use osmon_core::TaskDescriptor;
use osmon_protocol::TaskProcessInfo;
use thiserror::Error;

use crate::process::ProcessError;

/// Lifecycle state of a supervised task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MonitorState {
    /// Never started
    #[default]
    Unstarted,
    /// Spawning or adopting a process
    Starting,
    /// A live process is attached
    Running,
    /// The process exited and a delayed restart is armed
    PendingRestart,
    /// The process exited or failed to start, no restart armed
    Crashed,
    /// Termination in progress
    Stopping,
    /// Stopped on request, will not be restarted
    Stopped,
}

impl MonitorState {
    /// Returns true if a live process is attached in this state.
    pub fn has_process(&self) -> bool {
        matches!(self, MonitorState::Running)
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MonitorState::Unstarted => "unstarted",
            MonitorState::Starting => "starting",
            MonitorState::Running => "running",
            MonitorState::PendingRestart => "pending-restart",
            MonitorState::Crashed => "crashed",
            MonitorState::Stopping => "stopping",
            MonitorState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Timings used while starting a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupTiming {
    /// Time a freshly spawned process gets to settle (or daemonize)
    pub settle: Duration,
    /// How many times a missing pidfile is polled for
    pub pidfile_attempts: u32,
    /// Spacing between pidfile polls
    pub pidfile_interval: Duration,
}

impl Default for StartupTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            pidfile_attempts: 10,
            pidfile_interval: Duration::from_secs(1),
        }
    }
}

/// Errors returned by monitor operations.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// Sampling failed for a reason other than the process being gone
    #[error("Monitoring {task} failed: {reason}")]
    Transient { task: String, reason: String },
}

/// Capabilities of a task monitor.
///
/// `start`, `monitor` and `stop` are serialized per monitor; `describe`
/// never blocks on them and always returns the last published view.
#[async_trait]
pub trait TaskMonitor: Send + Sync {
    /// Task name from the configuration.
    fn name(&self) -> &str;

    /// Starts (or adopts) the task's process.
    async fn start(&self) -> Result<(), MonitorError>;

    /// Runs one supervision step: sample, detect exit, arm restarts.
    async fn monitor(&self) -> Result<(), MonitorError>;

    /// Cancels any pending restart and terminates the process.
    async fn stop(&self) -> Result<(), MonitorError>;

    /// Returns the externally visible status.
    fn describe(&self) -> TaskProcessInfo;

    /// Returns the current lifecycle state.
    fn state(&self) -> MonitorState;
}

/// Creates the monitor implementation for the running platform.
pub fn create_monitor(
    task: TaskDescriptor,
    timing: StartupTiming,
    restarts: RestartScheduler,
) -> Arc<dyn TaskMonitor> {
    ProcessMonitor::new(task, timing, restarts)
}
