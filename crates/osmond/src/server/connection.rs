//! Per-connection request handling.
//!
//! Each connection carries one framed request and one framed response:
//!
//! ```text
//! client                      handler
//!   │ ── [len][request JSON] ──▶ │  read (10s timeout)
//!   │                            │  dispatch
//!   │ ◀── [len][response JSON] ─ │  write (10s timeout)
//!   │            close           │
//! ```
//!
//! A frame that cannot be read or decoded closes the connection without
//! a response. Every decoded request gets one, even when the full answer
//! would exceed the frame size.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use osmon_protocol::{Action, ControlRequest, ControlResponse, FrameCodec, ProtocolError};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::process::ProcessError;
use crate::registry::ProcessRegistry;
use crate::signal::{Signal, SignalFlags};

/// Time a client gets to send its request
const READ_TIMEOUT: Duration = Duration::from_secs(10);

/// Time a client gets to take the response
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handles a single control connection.
pub struct ConnectionHandler {
    stream: TcpStream,
    peer: SocketAddr,
    registry: Arc<ProcessRegistry>,
    signals: SignalFlags,
    codec: FrameCodec,
    connection_number: u64,
}

impl ConnectionHandler {
    pub fn new(
        stream: TcpStream,
        peer: SocketAddr,
        registry: Arc<ProcessRegistry>,
        signals: SignalFlags,
        codec: FrameCodec,
        connection_number: u64,
    ) -> Self {
        Self {
            stream,
            peer,
            registry,
            signals,
            codec,
            connection_number,
        }
    }

    /// Runs the request/response cycle and closes the connection.
    pub async fn run(mut self) {
        debug!(
            conn = self.connection_number,
            peer = %self.peer,
            "Connection accepted"
        );

        if let Err(e) = self.serve().await {
            match e {
                ConnectionError::Protocol(ProtocolError::Eof) => {
                    debug!(conn = self.connection_number, "Client closed without a request");
                }
                other => {
                    warn!(
                        conn = self.connection_number,
                        peer = %self.peer,
                        error = %other,
                        "Closing connection without response"
                    );
                }
            }
        }

        let _ = self.stream.shutdown().await;
    }

    async fn serve(&mut self) -> Result<(), ConnectionError> {
        let read = timeout(READ_TIMEOUT, self.codec.read(&mut self.stream)).await;
        let request: ControlRequest = match read {
            Ok(result) => result?,
            Err(_) => return Err(ConnectionError::Timeout),
        };

        info!(
            conn = self.connection_number,
            action = %request.action,
            "Control request"
        );

        let response = dispatch(&self.registry, &self.signals, &request).await;
        let frame = encode_response(&self.codec, response)?;

        match timeout(WRITE_TIMEOUT, write_frame(&mut self.stream, &frame)).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }
}

async fn write_frame(stream: &mut TcpStream, frame: &[u8]) -> Result<(), ConnectionError> {
    stream
        .write_all(frame)
        .await
        .map_err(|e| ProtocolError::Io(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| ProtocolError::Io(e.to_string()))?;
    Ok(())
}

/// Encodes a response so that it always fits in one frame.
///
/// An oversized response is sent again without process environments. If
/// it still does not fit, the client gets a failure response naming the
/// size instead.
pub fn encode_response(
    codec: &FrameCodec,
    mut response: ControlResponse,
) -> Result<Vec<u8>, ProtocolError> {
    match codec.encode(&response) {
        Err(ProtocolError::FrameTooLarge { size, .. }) => {
            debug!(size, "Response too large, dropping process environments");
        }
        other => return other,
    }

    strip_environments(&mut response);

    match codec.encode(&response) {
        Err(e @ ProtocolError::FrameTooLarge { .. }) => {
            warn!(error = %e, "Response does not fit in one frame");
            codec.encode(&ControlResponse::failure(e.to_string()))
        }
        other => other,
    }
}

fn strip_environments(response: &mut ControlResponse) {
    let tasks = response.parameters.iter_mut().filter_map(|p| p.process.as_mut());
    for snapshot in response.osmon.iter_mut().chain(tasks) {
        snapshot.environ.clear();
    }
}

/// Turns a request into a response.
///
/// Never fails: errors raised while building the answer become failure
/// responses carrying the error text.
pub async fn dispatch(
    registry: &ProcessRegistry,
    signals: &SignalFlags,
    request: &ControlRequest,
) -> ControlResponse {
    let Some(action) = request.action() else {
        debug!(action = %request.action, "Unknown request");
        return ControlResponse::failure("Unknown request");
    };

    let result = match action {
        Action::Status => status(registry).await,
        Action::Stop => Ok(raise(signals, Signal::STOP, "Stop requested")),
        Action::Restart => Ok(raise(signals, Signal::RESTART, "Restart requested")),
        Action::Reload => Ok(raise(signals, Signal::RELOAD, "Reload requested")),
    };

    result.unwrap_or_else(|e| ControlResponse::failure(e.to_string()))
}

async fn status(registry: &ProcessRegistry) -> Result<ControlResponse, ProcessError> {
    let osmon = registry.self_snapshot().await?;
    Ok(ControlResponse::status_report(
        Some(osmon),
        registry.describe_all(),
    ))
}

fn raise(signals: &SignalFlags, flag: Signal, message: &str) -> ControlResponse {
    signals.set(flag);
    ControlResponse::ok(message)
}

/// Errors that end a connection without a response.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Read timeout")]
    Timeout,

    #[error("Write timeout")]
    WriteTimeout,
}
