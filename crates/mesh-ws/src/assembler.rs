//! Fragment reassembly (RFC 6455 Section 5.4).
//!
//! A fragmented message is a first fragment (FIN=0, Text or Binary), zero or
//! more continuation fragments (FIN=0, opcode 0x0) and a final continuation
//! (FIN=1). Control frames may be interleaved between fragments and are
//! handled by the connection before anything reaches the assembler.

use crate::error::{ErrorKind, ProtocolError};
use crate::event::Message;
use crate::frame::{Frame, Opcode};

/// Reassembly state for one connection.
#[derive(Debug)]
pub struct FragmentAssembler {
    max_message_size: usize,
    /// When false, fragments are validated and counted but not concatenated.
    concatenate: bool,
    /// Opcode of the first fragment. `None` = not in a fragment sequence.
    initial_opcode: Option<Opcode>,
    size: usize,
    buffer: Vec<u8>,
}

impl FragmentAssembler {
    pub fn new(max_message_size: usize, concatenate: bool) -> Self {
        Self {
            max_message_size,
            concatenate,
            initial_opcode: None,
            size: 0,
            buffer: Vec::new(),
        }
    }

    pub fn is_assembling(&self) -> bool {
        self.initial_opcode.is_some()
    }

    /// Bytes accumulated by the in-progress message.
    pub fn buffered(&self) -> usize {
        self.size
    }

    /// Feed one data frame.
    ///
    /// Returns `Ok(Some(message))` when the frame completes a message. When
    /// concatenation is disabled only unfragmented frames complete a message;
    /// fragments are still checked for ordering and total size.
    ///
    /// Any error aborts the in-progress message.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Message>, ProtocolError> {
        match frame.opcode {
            Opcode::Text | Opcode::Binary => {
                if self.is_assembling() {
                    self.reset();
                    return Err(ProtocolError::new(
                        ErrorKind::Protocol,
                        "new message during fragmented sequence",
                    ));
                }
                self.check_size(frame.payload.len())?;
                if frame.fin {
                    return finish(frame.opcode, frame.payload).map(Some);
                }
                self.initial_opcode = Some(frame.opcode);
                self.size = frame.payload.len();
                if self.concatenate {
                    self.buffer = frame.payload;
                }
                Ok(None)
            }
            Opcode::Continuation => {
                let Some(opcode) = self.initial_opcode else {
                    return Err(ProtocolError::new(
                        ErrorKind::UnexpectedContinuation,
                        "continuation frame without a message in progress",
                    ));
                };
                let total = self.size + frame.payload.len();
                if let Err(err) = self.check_size(total) {
                    self.reset();
                    return Err(err);
                }
                self.size = total;
                if self.concatenate {
                    self.buffer.extend_from_slice(&frame.payload);
                }
                if !frame.fin {
                    return Ok(None);
                }
                let payload = std::mem::take(&mut self.buffer);
                let concatenate = self.concatenate;
                self.reset();
                if concatenate {
                    finish(opcode, payload).map(Some)
                } else {
                    Ok(None)
                }
            }
            Opcode::Close | Opcode::Ping | Opcode::Pong => Err(ProtocolError::new(
                ErrorKind::Protocol,
                "control frame passed to reassembly",
            )),
        }
    }

    /// Drop any partially assembled message.
    pub fn reset(&mut self) {
        self.initial_opcode = None;
        self.size = 0;
        self.buffer = Vec::new();
    }

    fn check_size(&self, size: usize) -> Result<(), ProtocolError> {
        if size > self.max_message_size {
            return Err(ProtocolError::new(
                ErrorKind::MessageTooBig,
                format!(
                    "message of {} bytes exceeds maximum {}",
                    size, self.max_message_size
                ),
            ));
        }
        Ok(())
    }
}

/// Turn a completed payload into a message, validating text as UTF-8
/// over the whole reassembled payload rather than per fragment.
fn finish(opcode: Opcode, payload: Vec<u8>) -> Result<Message, ProtocolError> {
    match opcode {
        Opcode::Text => String::from_utf8(payload)
            .map(Message::Text)
            .map_err(|_| ProtocolError::new(ErrorKind::InvalidUtf8, "invalid UTF-8 in text message")),
        _ => Ok(Message::Binary(payload)),
    }
}
