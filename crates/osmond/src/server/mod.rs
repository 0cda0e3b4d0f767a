//! TCP control server for the osmon daemon.
//!
//! The server:
//! - Listens on a TCP address (localhost:5678 by default)
//! - Spawns a ConnectionHandler for each client
//! - Answers exactly one request per connection
//! - Supports graceful shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │  ControlServer  │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│ ProcessRegistry │  (status)
//! │ (per connection)│     └─────────────────┘
//! └───────┬─────────┘
//!         │ set flags (stop / restart / reload)
//!         ▼
//! ┌─────────────────┐
//! │   SignalFlags   │────▶ Supervisor
//! └─────────────────┘
//! ```
//!
//! On shutdown the listener stops accepting first, then the server waits
//! for in-flight handlers to finish their request/response cycle.

mod connection;

pub use connection::{dispatch, encode_response, ConnectionError, ConnectionHandler};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use osmon_protocol::FrameCodec;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::registry::ProcessRegistry;
use crate::signal::SignalFlags;

/// TCP control server bound to one registry.
pub struct ControlServer {
    /// Bound listener
    listener: TcpListener,

    /// Registry of the current supervisor iteration
    registry: Arc<ProcessRegistry>,

    /// Flags shared with the supervisor loop
    signals: SignalFlags,

    /// Framing shared by every connection
    codec: FrameCodec,

    /// In-flight connection handlers
    connections: TaskTracker,

    /// Connection counter for log correlation
    connection_counter: AtomicU64,
}

impl ControlServer {
    /// Binds the listener.
    ///
    /// Binding happens before the server runs so the caller learns about
    /// a busy port immediately and can read the actual address.
    pub async fn bind(
        addr: SocketAddr,
        registry: Arc<ProcessRegistry>,
        signals: SignalFlags,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr,
                error: e.to_string(),
            })?;

        Ok(Self {
            listener,
            registry,
            signals,
            codec: FrameCodec::new(),
            connections: TaskTracker::new(),
            connection_counter: AtomicU64::new(0),
        })
    }

    /// Replaces the frame codec (wider length prefixes).
    #[must_use]
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    /// Returns the address the listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Io(e.to_string()))
    }

    /// Runs the accept loop until the token is cancelled.
    ///
    /// Returns after every in-flight handler has finished and the
    /// listening socket is closed.
    pub async fn run(self, cancel_token: CancellationToken) -> Result<(), ServerError> {
        if let Ok(addr) = self.listener.local_addr() {
            info!(addr = %addr, "Control server listening");
        }

        loop {
            tokio::select! {
                _ = cancel_token.cancelled() => {
                    info!("Control server shutdown requested");
                    break;
                }

                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer)) => {
                            let conn_num = self.connection_counter.fetch_add(1, Ordering::Relaxed);
                            self.handle_connection(stream, peer, conn_num);
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }

        self.connections.close();
        debug!(
            in_flight = self.connections.len(),
            "Waiting for connection handlers"
        );
        self.connections.wait().await;

        drop(self.listener);
        info!("Control server stopped");
        Ok(())
    }

    /// Handles a new client connection by spawning a handler task.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, connection_number: u64) {
        let handler = ConnectionHandler::new(
            stream,
            peer,
            Arc::clone(&self.registry),
            self.signals.clone(),
            self.codec,
            connection_number,
        );
        self.connections.spawn(handler.run());
    }
}

/// Errors that can occur in server operations.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind control server to {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}
