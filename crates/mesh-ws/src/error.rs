//! Error taxonomy for the WebSocket engine.
//!
//! "Need more data" is not an error: [`FrameCodec::decode`] signals it with
//! `Ok(None)`. Everything else falls into one of four buckets:
//!
//! - [`ProtocolError`]: the peer broke RFC 6455. Fatal to the connection.
//! - [`UsageError`]: the local caller asked for something invalid. The
//!   connection stays open.
//! - [`WsError::Timeout`]: a close acknowledgment or keepalive grace period
//!   expired. The connection is forcibly terminated.
//! - [`WsError::Transport`]: the byte channel failed. Always fatal.
//!
//! [`WsError::Config`] only comes out of [`spawn`](crate::runner::spawn),
//! before any connection exists.
//!
//! [`FrameCodec::decode`]: crate::frame::FrameCodec::decode

use std::fmt;
use std::io;

use thiserror::Error;

use crate::close::CloseCode;

/// The specific kind of protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Reserved opcode (0x3-0x7, 0xB-0xF).
    BadOpcode,
    /// Reserved bit set without an extension claiming it.
    BadRsv,
    /// Masking does not match the sender's role.
    BadMask,
    /// A frame or assembled message exceeds the configured limit.
    MessageTooBig,
    /// A text message or close reason is not valid UTF-8.
    InvalidUtf8,
    /// A continuation frame arrived with no message in progress.
    UnexpectedContinuation,
    /// Any other framing violation (fragmented or oversized control frame,
    /// interleaved data messages, malformed close payload).
    Protocol,
}

impl ErrorKind {
    /// Close code sent to the peer when this violation tears the connection down.
    pub fn close_code(self) -> CloseCode {
        match self {
            Self::MessageTooBig => CloseCode::MessageTooBig,
            Self::InvalidUtf8 => CloseCode::InvalidData,
            _ => CloseCode::ProtocolError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadOpcode => write!(f, "bad opcode"),
            Self::BadRsv => write!(f, "bad reserved bits"),
            Self::BadMask => write!(f, "bad masking"),
            Self::MessageTooBig => write!(f, "message too big"),
            Self::InvalidUtf8 => write!(f, "invalid UTF-8"),
            Self::UnexpectedContinuation => write!(f, "unexpected continuation"),
            Self::Protocol => write!(f, "protocol error"),
        }
    }
}

/// A fatal violation of the wire protocol by the peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {description}")]
pub struct ProtocolError {
    pub kind: ErrorKind,
    pub description: String,
}

impl ProtocolError {
    pub fn new(kind: ErrorKind, description: impl Into<String>) -> Self {
        Self {
            kind,
            description: description.into(),
        }
    }

    pub fn close_code(&self) -> CloseCode {
        self.kind.close_code()
    }
}

/// An invalid request from the local application.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UsageError {
    #[error("control frame payload of {0} bytes exceeds 125")]
    ControlPayloadTooLarge(usize),
    #[error("connection is not open")]
    NotOpen,
    #[error("close reason of {0} bytes exceeds 123")]
    CloseReasonTooLong(usize),
    #[error("close code {0} may not be sent on the wire")]
    UnsendableCloseCode(u16),
}

/// Which deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    CloseAck,
    KeepaliveGrace,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CloseAck => write!(f, "close acknowledgment"),
            Self::KeepaliveGrace => write!(f, "keepalive response"),
        }
    }
}

/// Top-level error returned by [`Connection`](crate::Connection) operations.
#[derive(Debug, Error)]
pub enum WsError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Usage(#[from] UsageError),
    #[error("timed out waiting for {0}")]
    Timeout(TimeoutKind),
    #[error("transport error: {0}")]
    Transport(#[from] io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Failure to load or validate a [`ConnectionConfig`](crate::ConnectionConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}
