//! osmon Core - Shared types for the osmon process supervisor
//!
//! This crate provides the domain types shared between the daemon
//! (`osmond`), the wire protocol and the control client (`oscom`):
//!
//! - `task` - immutable task descriptors built from configuration
//! - `config` - daemon configuration and the file-backed loader
//! - `snapshot` - point-in-time samples of an OS process
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()` or `todo!()` outside of tests.

pub mod config;
pub mod error;
pub mod snapshot;
pub mod task;

// Re-exports for convenience
pub use config::{
    ConfigFormat, ConfigLoader, Configuration, FileConfigLoader, StaticConfigLoader,
    DEFAULT_LISTEN_ADDR, DEFAULT_MONITOR_INTERVAL_SECS, DEFAULT_TRACE_LEVEL,
};
pub use error::{ConfigError, ConfigResult};
pub use snapshot::{ContextSwitches, CpuTimes, MemoryInfo, ProcessSnapshot};
pub use task::{TaskDescriptor, DEFAULT_RESTART_DELAY_SECS};
