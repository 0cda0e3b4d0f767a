//! Point-in-time samples of an operating-system process.
//!
//! A `ProcessSnapshot` is captured in one coherent read of the process
//! table and never mutated afterwards; a newer poll replaces it wholesale.
//! The same type is reported on the control channel for supervised tasks
//! and for the daemon itself.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// CPU time breakdown in seconds.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CpuTimes {
    pub user: f64,
    pub system: f64,
    pub children_user: f64,
    pub children_system: f64,
    pub iowait: f64,
}

impl CpuTimes {
    /// Total CPU time consumed by the process itself.
    pub fn total(&self) -> f64 {
        self.user + self.system
    }
}

/// Memory breakdown in bytes.
///
/// `rss` and `vms` are always available; the remaining fields are only
/// filled on Linux.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub rss: u64,
    pub vms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lib: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirty: Option<u64>,
}

/// Voluntary and involuntary context switches.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextSwitches {
    pub voluntary: u64,
    pub involuntary: u64,
}

/// Immutable sample of one OS process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// OS process id
    pub pid: u32,

    /// Parent process id
    #[serde(default)]
    pub ppid: Option<u32>,

    /// Process name as reported by the OS
    pub name: String,

    /// Resolved executable path
    #[serde(default)]
    pub exe: Option<PathBuf>,

    /// Full command line
    #[serde(default)]
    pub cmdline: Vec<String>,

    /// Working directory
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Environment of the process
    #[serde(default)]
    pub environ: BTreeMap<String, String>,

    /// Owning user (numeric id as text when no name is known)
    #[serde(default)]
    pub username: Option<String>,

    /// Scheduler status (`running`, `sleeping`, `zombie`, ...)
    pub status: String,

    /// CPU the process last ran on
    #[serde(default)]
    pub cpu_num: Option<u32>,

    /// CPU usage since the previous sample, in percent of one core
    pub cpu_percent: f32,

    /// Resident memory as a percentage of total memory
    pub memory_percent: f32,

    #[serde(default)]
    pub cpu_times: CpuTimes,

    #[serde(default)]
    pub memory_info: MemoryInfo,

    /// Start time in seconds since the Unix epoch
    pub create_time: u64,

    #[serde(default)]
    pub num_threads: u32,

    #[serde(default)]
    pub num_fds: Option<u32>,

    #[serde(default)]
    pub num_ctx_switches: ContextSwitches,

    /// Controlling terminal, if any
    #[serde(default)]
    pub terminal: Option<String>,
}

impl ProcessSnapshot {
    /// Returns true if the sampled status means the process is gone.
    pub fn is_defunct(&self) -> bool {
        matches!(self.status.as_str(), "zombie" | "dead")
    }

    /// Returns the command line joined with spaces.
    pub fn command_line(&self) -> String {
        self.cmdline.join(" ")
    }
}
