//! osmon Daemon - Process supervision engine and control server
//!
//! This crate provides the core infrastructure for the osmon daemon:
//! - `process` - OS process handles, sampling and spawning
//! - `monitor` - per-task supervision state machine and delayed restarts
//! - `registry` - the set of monitors built from one configuration
//! - `signal` - the STOP/RESTART/RELOAD flags shared with the control server
//! - `server` - TCP control server for `oscom` clients
//! - `supervisor` - the top-level loop tying everything together
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        osmond daemon                        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐  flags   ┌─────────────────────────┐   │
//! │  │  ControlServer  │─────────▶│       Supervisor        │   │
//! │  │  (TCP listener) │          │ (wait / monitor / stop) │   │
//! │  └────────┬────────┘          └────────────┬────────────┘   │
//! │           │ status                         │ fan-out        │
//! │           ▼                                ▼                │
//! │  ┌─────────────────────────────────────────────────────┐    │
//! │  │                  ProcessRegistry                    │    │
//! │  │   ProcessMonitor ─ ProcessMonitor ─ ProcessMonitor  │    │
//! │  └──────────────────────────┬──────────────────────────┘    │
//! │                             │ delayed restarts              │
//! │                             ▼                               │
//! │                    ┌─────────────────┐                      │
//! │                    │ RestartScheduler│                      │
//! │                    └─────────────────┘                      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//!   outside of tests
//! - All fallible operations return `Result` or `Option`
//! - Per-task failures are logged and never abort the daemon

pub mod logging;
pub mod monitor;
pub mod process;
pub mod registry;
pub mod server;
pub mod signal;
pub mod supervisor;
