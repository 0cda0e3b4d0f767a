//! Length-prefixed JSON framing.
//!
//! Every frame is a big-endian length prefix followed by that many bytes
//! of UTF-8 JSON. Both peers use the same codec; the prefix is 2 bytes
//! unless both sides agree otherwise.
//!
//! ```text
//! ┌────────────┬──────────────────────────────┐
//! │ len (BE)   │ JSON payload (len bytes)     │
//! └────────────┴──────────────────────────────┘
//! ```

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::{Decoder, Encoder, LengthDelimitedCodec};

/// Initial read buffer size.
const READ_CHUNK: usize = 4096;

/// Prefix width used by the daemon and the client.
pub const DEFAULT_PREFIX_WIDTH: usize = 2;

/// Codec for length-prefixed JSON frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    prefix_width: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameCodec {
    /// Creates a codec with the default 2-byte prefix.
    pub const fn new() -> Self {
        Self {
            prefix_width: DEFAULT_PREFIX_WIDTH,
        }
    }

    /// Creates a codec with a wider prefix.
    ///
    /// Requested widths are rounded up to 2, 4 or 8 bytes. Zero and widths
    /// above 8 are rejected.
    pub fn with_prefix_width(width: usize) -> Result<Self, ProtocolError> {
        let prefix_width = match width {
            1..=2 => 2,
            3..=4 => 4,
            5..=8 => 8,
            _ => return Err(ProtocolError::InvalidPrefixWidth(width)),
        };
        Ok(Self { prefix_width })
    }

    /// Returns the prefix width in bytes.
    pub fn prefix_width(&self) -> usize {
        self.prefix_width
    }

    /// Largest payload the prefix can express.
    pub fn max_frame_len(&self) -> usize {
        match self.prefix_width {
            2 => u16::MAX as usize,
            4 => u32::MAX as usize,
            _ => usize::MAX,
        }
    }

    fn codec(&self) -> LengthDelimitedCodec {
        LengthDelimitedCodec::builder()
            .length_field_length(self.prefix_width)
            .big_endian()
            .max_frame_length(self.max_frame_len())
            .new_codec()
    }

    /// Serializes a message into one complete frame.
    pub fn encode<T: Serialize>(&self, message: &T) -> Result<Vec<u8>, ProtocolError> {
        let payload = serde_json::to_vec(message).map_err(|e| ProtocolError::Json(e.to_string()))?;

        if payload.len() > self.max_frame_len() {
            return Err(ProtocolError::FrameTooLarge {
                size: payload.len(),
                max: self.max_frame_len(),
            });
        }

        let mut buf = BytesMut::with_capacity(self.prefix_width + payload.len());
        self.codec()
            .encode(Bytes::from(payload), &mut buf)
            .map_err(|e| ProtocolError::Io(e.to_string()))?;

        Ok(buf.to_vec())
    }

    /// Decodes one complete frame.
    ///
    /// Fails with `Truncated` when the buffer holds less payload than the
    /// prefix announces.
    pub fn decode<T: DeserializeOwned>(&self, frame: &[u8]) -> Result<T, ProtocolError> {
        let mut buf = BytesMut::from(frame);
        let payload = self
            .codec()
            .decode(&mut buf)
            .map_err(|e| ProtocolError::Io(e.to_string()))?
            .ok_or(ProtocolError::Truncated)?;

        serde_json::from_slice(&payload).map_err(|e| ProtocolError::Json(e.to_string()))
    }

    /// Reads exactly one frame from a stream and decodes it.
    ///
    /// A stream that closes before the announced payload arrived yields
    /// `Truncated`; one that closes before any byte arrived yields `Eof`.
    pub async fn read<R, T>(&self, reader: &mut R) -> Result<T, ProtocolError>
    where
        R: AsyncRead + Unpin,
        T: DeserializeOwned,
    {
        let mut codec = self.codec();
        let mut buf = BytesMut::with_capacity(READ_CHUNK);
        // The codec consumes the prefix from `buf` once it is complete
        let mut received = 0usize;

        loop {
            if let Some(payload) = codec
                .decode(&mut buf)
                .map_err(|e| ProtocolError::Io(e.to_string()))?
            {
                return serde_json::from_slice(&payload)
                    .map_err(|e| ProtocolError::Json(e.to_string()));
            }

            let read = reader
                .read_buf(&mut buf)
                .await
                .map_err(|e| ProtocolError::Io(e.to_string()))?;
            received += read;
            if read == 0 {
                return Err(if received == 0 {
                    ProtocolError::Eof
                } else {
                    ProtocolError::Truncated
                });
            }
        }
    }

    /// Encodes a message and writes it as one frame, then flushes.
    pub async fn write<W, T>(&self, writer: &mut W, message: &T) -> Result<(), ProtocolError>
    where
        W: AsyncWrite + Unpin,
        T: Serialize,
    {
        let frame = self.encode(message)?;
        writer
            .write_all(&frame)
            .await
            .map_err(|e| ProtocolError::Io(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ProtocolError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Errors raised by the framing layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid length prefix width: {0}")]
    InvalidPrefixWidth(usize),

    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Frame truncated before the announced length")]
    Truncated,

    #[error("Connection closed")]
    Eof,

    #[error("Invalid JSON payload: {0}")]
    Json(String),

    #[error("I/O error: {0}")]
    Io(String),
}
