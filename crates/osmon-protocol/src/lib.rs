//! osmon Protocol - Wire protocol for the control channel
//!
//! This crate provides the message types exchanged between the daemon
//! and its control clients, and the length-prefixed framing both sides
//! use to carry them over TCP.
//!
//! One connection carries exactly one request frame followed by one
//! response frame.

pub mod frame;
pub mod message;

pub use frame::{FrameCodec, ProtocolError, DEFAULT_PREFIX_WIDTH};
pub use message::{
    Action, ControlRequest, ControlResponse, TaskProcessInfo, STATUS_NOT_RUNNING, STATUS_RUNNING,
};

/// Default TCP port of the control channel.
pub const DEFAULT_PORT: u16 = 5678;
