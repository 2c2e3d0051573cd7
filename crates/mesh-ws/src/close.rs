//! WebSocket close handshake (RFC 6455 Section 5.5.1, 7).
//!
//! - [`CloseCode`]: Status codes, including the local-only 1005/1006
//! - [`parse_close_payload`]: Extract status code + reason from a close frame payload
//! - [`encode_close_payload`]: Build a close frame payload from code + reason
//! - [`validate_close_request`]: Check a locally requested code/reason before sending
//! - [`CloseHandshake`]: Tracks who initiated and the acknowledgment deadline

use std::hash::{Hash, Hasher};
use std::time::{Duration, Instant};

use crate::error::{ErrorKind, ProtocolError, UsageError};

/// Longest close reason that fits a control frame next to the 2-byte code.
pub const MAX_CLOSE_REASON: usize = 123;

/// WebSocket close status codes per RFC 6455 Section 7.4.1.
///
/// Equality and hashing go by the numeric code, so `Other(1000)` equals
/// `Normal`. [`CloseCode::from`] always yields the named variant.
#[derive(Debug, Clone, Copy)]
pub enum CloseCode {
    /// 1000
    Normal,
    /// 1001
    GoingAway,
    /// 1002
    ProtocolError,
    /// 1003
    UnprocessableInput,
    /// 1004
    Reserved,
    /// 1005. Reported locally when the peer's Close carried no code; never sent.
    NotProvided,
    /// 1006. Reported locally when the connection ended without a handshake; never sent.
    Abnormal,
    /// 1007
    InvalidData,
    /// 1008
    PolicyViolation,
    /// 1009
    MessageTooBig,
    /// 1010
    ExtensionRequired,
    /// 1011
    InternalError,
    /// Any other code (1012-1015, registered 3000-3999, private 4000-4999, or invalid).
    Other(u16),
}

impl PartialEq for CloseCode {
    fn eq(&self, other: &Self) -> bool {
        u16::from(*self) == u16::from(*other)
    }
}

impl Eq for CloseCode {}

impl Hash for CloseCode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        u16::from(*self).hash(state);
    }
}

impl CloseCode {
    /// Whether this code may appear in a Close frame we send.
    pub fn is_sendable(self) -> bool {
        is_valid_wire_code(u16::from(self))
    }
}

/// Codes that may legitimately travel on the wire in either direction.
fn is_valid_wire_code(code: u16) -> bool {
    matches!(code, 1000..=1003 | 1007..=1014 | 3000..=4999)
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1003 => Self::UnprocessableInput,
            1004 => Self::Reserved,
            1005 => Self::NotProvided,
            1006 => Self::Abnormal,
            1007 => Self::InvalidData,
            1008 => Self::PolicyViolation,
            1009 => Self::MessageTooBig,
            1010 => Self::ExtensionRequired,
            1011 => Self::InternalError,
            other => Self::Other(other),
        }
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> u16 {
        match code {
            CloseCode::Normal => 1000,
            CloseCode::GoingAway => 1001,
            CloseCode::ProtocolError => 1002,
            CloseCode::UnprocessableInput => 1003,
            CloseCode::Reserved => 1004,
            CloseCode::NotProvided => 1005,
            CloseCode::Abnormal => 1006,
            CloseCode::InvalidData => 1007,
            CloseCode::PolicyViolation => 1008,
            CloseCode::MessageTooBig => 1009,
            CloseCode::ExtensionRequired => 1010,
            CloseCode::InternalError => 1011,
            CloseCode::Other(code) => code,
        }
    }
}

/// Parse a received close frame payload into its code and reason.
///
/// An empty payload is legal and yields `Ok(None)`. A 1-byte payload, a code
/// outside the valid wire ranges, or a reason that is not UTF-8 is a protocol
/// violation.
pub fn parse_close_payload(payload: &[u8]) -> Result<Option<(CloseCode, String)>, ProtocolError> {
    match payload.len() {
        0 => Ok(None),
        1 => Err(ProtocolError::new(
            ErrorKind::Protocol,
            "close payload of 1 byte",
        )),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !is_valid_wire_code(code) {
                return Err(ProtocolError::new(
                    ErrorKind::Protocol,
                    format!("invalid close code {}", code),
                ));
            }
            let reason = std::str::from_utf8(&payload[2..]).map_err(|_| {
                ProtocolError::new(ErrorKind::InvalidUtf8, "close reason is not valid UTF-8")
            })?;
            Ok(Some((CloseCode::from(code), reason.to_string())))
        }
    }
}

/// Build a close frame payload from a status code and reason.
///
/// Codes that must not be sent (1005, 1006, ...) produce an empty payload.
/// The reason is cut at a character boundary so the payload stays within
/// the 125-byte control frame limit.
pub fn encode_close_payload(code: CloseCode, reason: &str) -> Vec<u8> {
    if !code.is_sendable() {
        return Vec::new();
    }
    let reason = truncate_reason(reason);
    let mut payload = Vec::with_capacity(2 + reason.len());
    payload.extend_from_slice(&u16::from(code).to_be_bytes());
    payload.extend_from_slice(reason.as_bytes());
    payload
}

fn truncate_reason(reason: &str) -> &str {
    if reason.len() <= MAX_CLOSE_REASON {
        return reason;
    }
    let mut end = MAX_CLOSE_REASON;
    while !reason.is_char_boundary(end) {
        end -= 1;
    }
    &reason[..end]
}

/// Check a code and reason supplied by the local application to `close()`.
pub fn validate_close_request(code: CloseCode, reason: &str) -> Result<(), UsageError> {
    if !code.is_sendable() {
        return Err(UsageError::UnsendableCloseCode(u16::from(code)));
    }
    if reason.len() > MAX_CLOSE_REASON {
        return Err(UsageError::CloseReasonTooLong(reason.len()));
    }
    Ok(())
}

/// Close handshake controller.
///
/// Holds the acknowledgment deadline armed by a locally initiated close.
/// The deadline is cleared by [`CloseHandshake::acknowledge`] or
/// [`CloseHandshake::cancel`] so it can never fire after the connection has
/// left the closing state.
#[derive(Debug)]
pub struct CloseHandshake {
    timeout: Duration,
    deadline: Option<Instant>,
    /// Code we sent, once we have sent a Close frame.
    sent: Option<CloseCode>,
}

impl CloseHandshake {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            deadline: None,
            sent: None,
        }
    }

    /// Record that we sent a Close frame and arm the acknowledgment timer.
    pub fn initiate(&mut self, code: CloseCode, now: Instant) {
        self.sent = Some(code);
        self.deadline = Some(now + self.timeout);
    }

    /// Whether we have sent a Close frame and are waiting for the peer's.
    pub fn is_awaiting_ack(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        self.deadline.is_some_and(|deadline| now >= deadline)
    }

    /// The peer's Close arrived after ours. Returns the code to report:
    /// the peer's, or the one we sent if the peer sent none.
    pub fn acknowledge(&mut self, peer: Option<CloseCode>) -> CloseCode {
        self.deadline = None;
        peer.or(self.sent).unwrap_or(CloseCode::Normal)
    }

    /// The peer initiated. Returns the payload to echo back: the peer's code
    /// without a reason, or nothing if the peer sent no code.
    pub fn respond(&mut self, peer: Option<CloseCode>) -> Vec<u8> {
        self.deadline = None;
        match peer {
            Some(code) => {
                self.sent = Some(code);
                encode_close_payload(code, "")
            }
            None => Vec::new(),
        }
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}
