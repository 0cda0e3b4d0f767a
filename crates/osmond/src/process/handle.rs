//! A handle on one OS process.

use osmon_core::ProcessSnapshot;
use tokio::process::Child;
use tracing::{debug, info};

use super::{ProcessError, ProcessSampler};

/// One attached OS process.
///
/// A handle is either adopted by PID (a process found through a pidfile)
/// or wraps a child the daemon spawned itself. Children are reaped as soon
/// as they exit so they never linger as zombies.
pub struct ProcessHandle {
    pid: u32,
    child: Option<Child>,
    sampler: ProcessSampler,
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("child", &self.child.is_some())
            .finish()
    }
}

impl ProcessHandle {
    /// Attaches to an existing process by PID.
    ///
    /// Fails with `NoSuchProcess` if the PID is unused or a zombie.
    pub fn attach(pid: u32) -> Result<Self, ProcessError> {
        let mut handle = Self {
            pid,
            child: None,
            sampler: ProcessSampler::new(),
        };
        handle.sample()?;
        Ok(handle)
    }

    /// Wraps a child spawned by the daemon.
    pub fn from_child(child: Child) -> Result<Self, ProcessError> {
        let pid = child
            .id()
            .ok_or_else(|| ProcessError::ProcessNotFound("child exited before attach".into()))?;
        Ok(Self {
            pid,
            child: Some(child),
            sampler: ProcessSampler::new(),
        })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Returns true if the daemon spawned this process itself.
    pub fn is_child(&self) -> bool {
        self.child.is_some()
    }

    /// Reaps the child if it has exited. Returns true if it is gone.
    fn reap(&mut self) -> bool {
        let Some(child) = self.child.as_mut() else {
            return false;
        };

        match child.try_wait() {
            Ok(Some(status)) => {
                info!(pid = self.pid, status = %status, "Child process exited");
                self.child = None;
                true
            }
            Ok(None) => false,
            Err(e) => {
                debug!(pid = self.pid, error = %e, "Failed to poll child status");
                false
            }
        }
    }

    /// Returns the process's command line.
    pub fn cmdline(&mut self) -> Result<Vec<String>, ProcessError> {
        if self.reap() {
            return Err(ProcessError::NoSuchProcess(self.pid));
        }
        self.sampler
            .cmdline(self.pid)
            .ok_or(ProcessError::NoSuchProcess(self.pid))
    }

    /// Samples the process.
    ///
    /// Fails with `NoSuchProcess` once the process has exited, including
    /// when only a zombie or dead entry is left.
    pub fn sample(&mut self) -> Result<ProcessSnapshot, ProcessError> {
        if self.reap() {
            return Err(ProcessError::NoSuchProcess(self.pid));
        }

        match self.sampler.sample(self.pid) {
            Some(snapshot) if !snapshot.is_defunct() => Ok(snapshot),
            _ => Err(ProcessError::NoSuchProcess(self.pid)),
        }
    }

    /// Forcibly terminates the process.
    ///
    /// Spawned children are killed and waited for. A process that is
    /// already gone is not an error.
    pub async fn kill(&mut self) -> Result<(), ProcessError> {
        if let Some(mut child) = self.child.take() {
            return match child.kill().await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(ProcessError::Io(e.to_string())),
            };
        }

        if self.sampler.kill(self.pid) || !self.sampler.exists(self.pid) {
            Ok(())
        } else {
            Err(ProcessError::Io(format!("failed to kill process {}", self.pid)))
        }
    }
}
