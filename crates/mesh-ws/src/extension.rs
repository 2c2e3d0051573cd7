//! Per-frame payload transform hook for negotiated extensions.
//!
//! The engine does not ship any extension. A transform registered on a
//! connection is only active when its name appears in the negotiated
//! extension list, and only then are the RSV bits it claims accepted on
//! inbound frames.

use crate::error::ProtocolError;
use crate::frame::Frame;

pub trait FrameExtension: Send {
    /// Extension token as it appears in `Sec-WebSocket-Extensions`.
    fn name(&self) -> &str;

    /// RSV bits this extension uses, packed like [`Frame::rsv_bits`].
    fn rsv_bits(&self) -> u8 {
        0
    }

    /// Transform an inbound data frame before reassembly.
    fn decode(&mut self, frame: &mut Frame) -> Result<(), ProtocolError>;

    /// Transform an outbound data frame before encoding.
    fn encode(&mut self, frame: &mut Frame);
}
