//! Task descriptors - the immutable unit of supervision.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Restart delay applied when the configuration does not specify one.
pub const DEFAULT_RESTART_DELAY_SECS: u64 = 5;

fn default_restart_delay() -> u64 {
    DEFAULT_RESTART_DELAY_SECS
}

/// Configuration of one supervised task.
///
/// Created from configuration at load or reload time and never mutated
/// afterwards. The registry owns one descriptor per monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDescriptor {
    /// Unique task name, used in logs and status responses
    pub name: String,

    /// Executable or script to launch
    pub process: PathBuf,

    /// Arguments passed after the executable
    #[serde(default)]
    pub arguments: Vec<String>,

    /// Pidfile written by the child itself (daemonizing programs)
    #[serde(default)]
    pub pidfile: Option<PathBuf>,

    /// Working directory of the child
    #[serde(default, alias = "working-directory")]
    pub cwd: Option<PathBuf>,

    /// Numeric user id the child runs as
    #[serde(default)]
    pub user: Option<u32>,

    /// Numeric group id the child runs as
    #[serde(default)]
    pub group: Option<u32>,

    /// Seconds to wait before restarting a crashed child (0 = immediately)
    #[serde(default = "default_restart_delay", alias = "restart-delay")]
    pub restart_delay: u64,

    /// Extra environment variables for the child
    #[serde(default, alias = "environ")]
    pub environment: BTreeMap<String, String>,

    /// Explicit interpreter for script-type executables
    #[serde(default)]
    pub interpreter: Option<PathBuf>,
}

impl TaskDescriptor {
    /// Creates a descriptor with defaults for everything but name and executable.
    pub fn new(name: impl Into<String>, process: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            process: process.into(),
            arguments: Vec::new(),
            pidfile: None,
            cwd: None,
            user: None,
            group: None,
            restart_delay: DEFAULT_RESTART_DELAY_SECS,
            environment: BTreeMap::new(),
            interpreter: None,
        }
    }

    /// Sets the argument list.
    #[must_use]
    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the pidfile path.
    #[must_use]
    pub fn with_pidfile(mut self, pidfile: impl Into<PathBuf>) -> Self {
        self.pidfile = Some(pidfile.into());
        self
    }

    /// Sets the restart delay in seconds.
    #[must_use]
    pub fn with_restart_delay(mut self, secs: u64) -> Self {
        self.restart_delay = secs;
        self
    }

    /// Returns the delay before a restart, or `None` for an immediate restart.
    pub fn restart_after(&self) -> Option<Duration> {
        match self.restart_delay {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }

    /// Returns the interpreter a script-type executable must be run with.
    ///
    /// An explicit `interpreter` always wins; otherwise `.py` maps to
    /// `python3` and `.sh` to `/bin/sh`. Native executables return `None`.
    pub fn script_interpreter(&self) -> Option<PathBuf> {
        if let Some(ref interpreter) = self.interpreter {
            return Some(interpreter.clone());
        }

        match self.process.extension().and_then(|ext| ext.to_str()) {
            Some("py") => Some(PathBuf::from("python3")),
            Some("sh") => Some(PathBuf::from("/bin/sh")),
            _ => None,
        }
    }

    /// Returns the pidfile path as displayed in status responses.
    pub fn pidfile_display(&self) -> String {
        self.pidfile
            .as_deref()
            .map(Path::display)
            .map(|d| d.to_string())
            .unwrap_or_default()
    }
}
