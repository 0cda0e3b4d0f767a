//! OS process handling.
//!
//! - `handle` - `ProcessHandle`, one attached OS process
//! - `sampler` - resource and status sampling (sysinfo, procfs on Linux)
//! - `spawn` - argument vectors, permission checks, launching and pidfiles

mod handle;
mod sampler;
mod spawn;

pub use handle::ProcessHandle;
pub use sampler::ProcessSampler;
pub use spawn::{build_argv, command_line_matches, launch, read_pidfile, remove_pidfile};

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while spawning, attaching to or sampling a process.
#[derive(Debug, Error)]
pub enum ProcessError {
    /// The process no longer exists (or only as a zombie)
    #[error("No such process: {0}")]
    NoSuchProcess(u32),

    /// The executable lacks an execute permission bit
    #[error("Not executable: {0}")]
    NotExecutable(PathBuf),

    /// The executable or script does not exist
    #[error("File not found: {0}")]
    NotFound(PathBuf),

    /// The started process could not be located (pidfile never appeared)
    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    /// The OS refused to launch the process
    #[error("Failed to spawn {path}: {reason}")]
    Spawn { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(String),
}
