//! oscom - Control client for the osmon daemon
//!
//! - `client` - one-shot request/response over the control channel
//! - `render` - plain-text rendering of daemon responses
//! - `error` - client error type

pub mod client;
pub mod error;
pub mod render;

pub use client::{ClientConfig, ControlClient, DEFAULT_HOST};
pub use error::ClientError;
pub use render::{outcome_line, render_status};
