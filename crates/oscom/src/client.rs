//! Control channel client.
//!
//! Every request opens a fresh TCP connection, writes one frame, reads one
//! frame and closes. The daemon closes without answering when it cannot
//! decode the request, which surfaces here as a protocol error.

use std::time::Duration;

use osmon_protocol::{Action, ControlRequest, ControlResponse, FrameCodec, DEFAULT_PORT};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::ClientError;

/// Default daemon host.
pub const DEFAULT_HOST: &str = "localhost";

/// Where and how to reach the daemon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Applies to connect and to the whole exchange separately
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// `host:port` as passed to the resolver.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client for the daemon's control channel.
#[derive(Debug, Clone)]
pub struct ControlClient {
    config: ClientConfig,
    codec: FrameCodec,
}

impl ControlClient {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            codec: FrameCodec::new(),
        }
    }

    /// Uses a non-default frame codec. Both peers must agree on it.
    #[must_use]
    pub fn with_codec(mut self, codec: FrameCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends a request for a known action.
    pub async fn action(&self, action: Action) -> Result<ControlResponse, ClientError> {
        self.send(&ControlRequest::new(action)).await
    }

    /// Sends one request and waits for its response.
    pub async fn send(&self, request: &ControlRequest) -> Result<ControlResponse, ClientError> {
        let addr = self.config.address();

        let mut stream = match timeout(self.config.timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::Connect {
                    addr,
                    error: e.to_string(),
                })
            }
            Err(_) => return Err(ClientError::Timeout),
        };

        debug!(addr = %addr, action = %request.action, "Sending control request");

        let exchange = async {
            self.codec.write(&mut stream, request).await?;
            self.codec.read::<_, ControlResponse>(&mut stream).await
        };

        match timeout(self.config.timeout, exchange).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ClientError::Timeout),
        }
    }
}
