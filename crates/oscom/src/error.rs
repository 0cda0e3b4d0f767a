//! Error types for the control client.
//!
//! Connection failures carry the address so the message tells the user
//! which daemon could not be reached.

use osmon_protocol::ProtocolError;
use thiserror::Error;

/// Control client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The daemon could not be reached.
    ///
    /// Usually the daemon is not running or listens on another port.
    #[error("Failed to connect to osmon daemon at {addr}: {error}")]
    Connect { addr: String, error: String },

    /// The daemon did not answer in time.
    #[error("Timed out waiting for the osmon daemon")]
    Timeout,

    /// The daemon closed the connection without a valid response.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
