//! WebSocket frame codec (RFC 6455 Section 5.2-5.3).
//!
//! Frames are the smallest unit of WebSocket communication. The codec works
//! on a growing receive buffer: [`FrameCodec::decode`] returns `Ok(None)`
//! until a whole frame is buffered and consumes nothing in that case.
//!
//! - [`FrameCodec::decode`]: Parse a single frame (validates RSV, opcode, masking, limits)
//! - [`FrameCodec::encode`]: Write a frame, masking according to the codec's role
//! - [`apply_mask`]: Symmetric XOR masking per RFC 6455 Section 5.3

use bytes::{BufMut, BytesMut};

use crate::error::{ErrorKind, ProtocolError};

/// Largest payload a control frame may carry.
pub const MAX_CONTROL_PAYLOAD: usize = 125;

/// Which end of the connection this endpoint is.
///
/// Clients mask every frame they send; servers never mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// WebSocket frame opcodes per RFC 6455 Section 5.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation = 0x0,
    Text = 0x1,
    Binary = 0x2,
    Close = 0x8,
    Ping = 0x9,
    Pong = 0xA,
}

impl Opcode {
    /// Parse a 4-bit opcode value.
    ///
    /// Reserved opcodes (0x3-0x7, 0xB-0xF) yield [`ErrorKind::BadOpcode`].
    pub fn from_u8(byte: u8) -> Result<Opcode, ProtocolError> {
        match byte {
            0x0 => Ok(Opcode::Continuation),
            0x1 => Ok(Opcode::Text),
            0x2 => Ok(Opcode::Binary),
            0x8 => Ok(Opcode::Close),
            0x9 => Ok(Opcode::Ping),
            0xA => Ok(Opcode::Pong),
            _ => Err(ProtocolError::new(
                ErrorKind::BadOpcode,
                format!("unknown opcode: 0x{:X}", byte),
            )),
        }
    }

    /// Close, Ping and Pong.
    pub fn is_control(self) -> bool {
        matches!(self, Opcode::Close | Opcode::Ping | Opcode::Pong)
    }
}

/// A single WebSocket frame with its logical (unmasked) payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// FIN bit -- `true` if this is the final fragment of a message.
    pub fin: bool,
    pub rsv1: bool,
    pub rsv2: bool,
    pub rsv3: bool,
    pub opcode: Opcode,
    /// Masking key. Present iff the frame is masked on the wire.
    pub mask: Option<[u8; 4]>,
    pub payload: Vec<u8>,
}

impl Frame {
    /// A final, unmasked frame with no reserved bits set.
    pub fn new(opcode: Opcode, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            fin: true,
            rsv1: false,
            rsv2: false,
            rsv3: false,
            opcode,
            mask: None,
            payload: payload.into(),
        }
    }

    pub fn text(text: impl Into<String>) -> Self {
        Self::new(Opcode::Text, text.into().into_bytes())
    }

    pub fn binary(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Binary, data)
    }

    pub fn ping(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Ping, data)
    }

    pub fn pong(data: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Pong, data)
    }

    pub fn close(payload: impl Into<Vec<u8>>) -> Self {
        Self::new(Opcode::Close, payload)
    }

    pub fn continuation(data: impl Into<Vec<u8>>, fin: bool) -> Self {
        Self {
            fin,
            ..Self::new(Opcode::Continuation, data)
        }
    }

    /// Set the FIN bit.
    pub fn with_fin(mut self, fin: bool) -> Self {
        self.fin = fin;
        self
    }

    pub fn is_masked(&self) -> bool {
        self.mask.is_some()
    }

    /// Reserved bits packed into the low three bits (RSV1 = 0b100).
    pub fn rsv_bits(&self) -> u8 {
        (u8::from(self.rsv1) << 2) | (u8::from(self.rsv2) << 1) | u8::from(self.rsv3)
    }
}

/// Apply or remove the 4-byte XOR mask on a payload.
///
/// The operation is symmetric: applying the mask twice returns the original.
pub fn apply_mask(payload: &mut [u8], mask_key: &[u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= mask_key[i % 4];
    }
}

/// Stateless frame encoder/decoder bound to one endpoint role.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    role: Role,
    max_frame_size: usize,
    /// RSV bits claimed by negotiated extensions (RSV1 = 0b100).
    allowed_rsv: u8,
}

impl FrameCodec {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            max_frame_size: 1024 * 1024,
            allowed_rsv: 0,
        }
    }

    /// Largest payload a single received frame may declare.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Reserved bits that extensions have claimed and that may be set on receipt.
    pub fn allowed_rsv(mut self, bits: u8) -> Self {
        self.allowed_rsv = bits & 0x07;
        self
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Parse one frame from the front of `buf`.
    ///
    /// Returns `Ok(None)` when the buffer holds less than one full frame; the
    /// buffer is left untouched so the caller can append and retry. Length
    /// fields are checked against `max_frame_size` as soon as they are
    /// readable, so a hostile length never causes the payload to be buffered.
    pub fn decode(&self, buf: &mut BytesMut) -> Result<Option<Frame>, ProtocolError> {
        // Byte 0: FIN(1) RSV(3) Opcode(4)
        // Byte 1: MASK(1) Payload-Length(7)
        if buf.len() < 2 {
            return Ok(None);
        }
        let (byte0, byte1) = (buf[0], buf[1]);

        let fin = (byte0 & 0x80) != 0;
        let rsv = (byte0 >> 4) & 0x07;
        if rsv & !self.allowed_rsv != 0 {
            return Err(ProtocolError::new(
                ErrorKind::BadRsv,
                "non-zero RSV bits without negotiated extensions",
            ));
        }
        let opcode = Opcode::from_u8(byte0 & 0x0F)?;

        let masked = (byte1 & 0x80) != 0;
        match (self.role, masked) {
            (Role::Server, false) => {
                return Err(ProtocolError::new(
                    ErrorKind::BadMask,
                    "received unmasked frame from client",
                ))
            }
            (Role::Client, true) => {
                return Err(ProtocolError::new(
                    ErrorKind::BadMask,
                    "received masked frame from server",
                ))
            }
            _ => {}
        }

        let length_byte = byte1 & 0x7F;
        if opcode.is_control() {
            if !fin {
                return Err(ProtocolError::new(
                    ErrorKind::Protocol,
                    "fragmented control frame",
                ));
            }
            if usize::from(length_byte) > MAX_CONTROL_PAYLOAD {
                return Err(ProtocolError::new(
                    ErrorKind::Protocol,
                    "control frame payload exceeds 125 bytes",
                ));
            }
        }

        // Payload length: 3 encodings per RFC 6455 Section 5.2
        let (payload_len, mut offset) = match length_byte {
            0..=125 => (u64::from(length_byte), 2),
            126 => {
                if buf.len() < 4 {
                    return Ok(None);
                }
                (u64::from(u16::from_be_bytes([buf[2], buf[3]])), 4)
            }
            _ => {
                if buf.len() < 10 {
                    return Ok(None);
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&buf[2..10]);
                let len = u64::from_be_bytes(raw);
                if len >> 63 != 0 {
                    return Err(ProtocolError::new(
                        ErrorKind::MessageTooBig,
                        "MSB of 64-bit length must be 0",
                    ));
                }
                (len, 10)
            }
        };

        if payload_len > self.max_frame_size as u64 {
            return Err(ProtocolError::new(
                ErrorKind::MessageTooBig,
                format!(
                    "frame payload of {} bytes exceeds maximum {}",
                    payload_len, self.max_frame_size
                ),
            ));
        }
        // Bounded by max_frame_size, which is a usize.
        let payload_len = payload_len as usize;

        let mask_key = if masked {
            if buf.len() < offset + 4 {
                return Ok(None);
            }
            let mut key = [0u8; 4];
            key.copy_from_slice(&buf[offset..offset + 4]);
            offset += 4;
            Some(key)
        } else {
            None
        };

        if buf.len() < offset + payload_len {
            buf.reserve(offset + payload_len - buf.len());
            return Ok(None);
        }

        let _ = buf.split_to(offset);
        let mut payload = buf.split_to(payload_len).to_vec();
        if let Some(key) = mask_key {
            apply_mask(&mut payload, &key);
        }

        Ok(Some(Frame {
            fin,
            rsv1: rsv & 0b100 != 0,
            rsv2: rsv & 0b010 != 0,
            rsv3: rsv & 0b001 != 0,
            opcode,
            mask: mask_key,
            payload,
        }))
    }

    /// Append the wire encoding of `frame` to `dst`.
    ///
    /// Masking follows the role, not the frame: a client always masks (using
    /// the frame's key if it carries one, otherwise a fresh random key) and
    /// a server never does.
    pub fn encode(&self, frame: &Frame, dst: &mut BytesMut) {
        let mask = match self.role {
            Role::Client => Some(frame.mask.unwrap_or_else(rand::random)),
            Role::Server => None,
        };

        let byte0 = if frame.fin { 0x80 } else { 0x00 } | (frame.rsv_bits() << 4) | frame.opcode as u8;
        let mask_bit = if mask.is_some() { 0x80 } else { 0x00 };

        let len = frame.payload.len();
        dst.reserve(14 + len);
        dst.put_u8(byte0);
        if len <= MAX_CONTROL_PAYLOAD {
            dst.put_u8(mask_bit | len as u8);
        } else if len < 65536 {
            dst.put_u8(mask_bit | 126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(mask_bit | 127);
            dst.put_u64(len as u64);
        }

        match mask {
            Some(key) => {
                dst.put_slice(&key);
                let start = dst.len();
                dst.put_slice(&frame.payload);
                apply_mask(&mut dst[start..], &key);
            }
            None => dst.put_slice(&frame.payload),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn server() -> FrameCodec {
        FrameCodec::new(Role::Server)
    }

    fn client() -> FrameCodec {
        FrameCodec::new(Role::Client)
    }

    #[test]
    fn test_mask_roundtrip() {
        let original = b"Hello".to_vec();
        let key = [0x37, 0xfa, 0x21, 0x3d];
        let mut masked = original.clone();
        apply_mask(&mut masked, &key);
        assert_ne!(masked, original, "masked should differ from original");
        apply_mask(&mut masked, &key);
        assert_eq!(masked, original, "unmasked should equal original");
    }

    #[test]
    fn test_decode_7bit_text_frame() {
        // FIN=1, opcode=Text, MASK=1, len=2, zero mask key, payload "Hi"
        let mut buf = BytesMut::from(&[0x81, 0x82, 0, 0, 0, 0, b'H', b'i'][..]);
        let frame = server().decode(&mut buf).unwrap().unwrap();
        assert!(frame.fin);
        assert_eq!(frame.opcode, Opcode::Text);
        assert_eq!(frame.payload, b"Hi");
        assert_eq!(frame.mask, Some([0, 0, 0, 0]));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_unmasks_payload() {
        let key = [0x12, 0x34, 0x56, 0x78];
        let mut payload = b"masked".to_vec();
        apply_mask(&mut payload, &key);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x82, 0x80 | 6]);
        buf.extend_from_slice(&key);
        buf.extend_from_slice(&payload);

        let frame = server().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload, b"masked");
    }

    #[test]
    fn test_decode_16bit_length() {
        let payload = vec![0xABu8; 200];
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x82, 0xFE]);
        buf.extend_from_slice(&200u16.to_be_bytes());
        buf.extend_from_slice(&[0u8; 4]);
        buf.extend_from_slice(&payload);

        let frame = server().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, Opcode::Binary);
        assert_eq!(frame.payload, payload);
    }

    #[test]
    fn test_decode_64bit_length() {
        let payload = vec![0xCDu8; 300];
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x82, 0x7F]);
        buf.extend_from_slice(&300u64.to_be_bytes());
        buf.extend_from_slice(&payload);

        let frame = client().decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.payload.len(), 300);
        assert_eq!(frame.mask, None);
    }

    #[test]
    fn test_partial_frame_needs_more_data() {
        let mut full = BytesMut::new();
        client().encode(&Frame::text("partial delivery"), &mut full);

        // Feed one byte at a time; only the last byte completes the frame.
        let codec = server();
        let mut buf = BytesMut::new();
        for (i, byte) in full.iter().enumerate() {
            buf.put_u8(*byte);
            let result = codec.decode(&mut buf).unwrap();
            if i + 1 < full.len() {
                assert!(result.is_none(), "byte {} should not complete the frame", i);
                assert_eq!(buf.len(), i + 1, "nothing is consumed while incomplete");
            } else {
                assert_eq!(result.unwrap().payload, b"partial delivery");
            }
        }
    }

    #[test]
    fn test_two_frames_in_one_buffer() {
        let mut buf = BytesMut::new();
        server().encode(&Frame::text("one"), &mut buf);
        server().encode(&Frame::binary(vec![2]), &mut buf);

        let codec = client();
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().payload, b"one");
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap().payload, vec![2]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_unknown_opcode() {
        let mut buf = BytesMut::from(&[0x83, 0x80, 0, 0, 0, 0][..]);
        let err = server().decode(&mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadOpcode);
        assert!(err.description.contains("unknown opcode"));
    }

    #[test]
    fn test_nonzero_rsv_rejected() {
        let mut buf = BytesMut::from(&[0xC1, 0x80, 0, 0, 0, 0][..]);
        let err = server().decode(&mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::BadRsv);
    }

    #[test]
    fn test_rsv_allowed_when_claimed() {
        let mut buf = BytesMut::from(&[0xC1, 0x80, 0, 0, 0, 0][..]);
        let frame = server().allowed_rsv(0b100).decode(&mut buf).unwrap().unwrap();
        assert!(frame.rsv1);
        assert!(!frame.rsv2);
    }

    #[test]
    fn test_mask_rules_by_role() {
        let mut unmasked = BytesMut::from(&[0x81, 0x00][..]);
        assert_eq!(
            server().decode(&mut unmasked).unwrap_err().kind,
            ErrorKind::BadMask
        );

        let mut masked = BytesMut::from(&[0x81, 0x80, 1, 2, 3, 4][..]);
        assert_eq!(
            client().decode(&mut masked).unwrap_err().kind,
            ErrorKind::BadMask
        );
    }

    #[test]
    fn test_control_frame_length_126_rejected_before_payload() {
        // Ping declaring the 16-bit length form; no length or payload bytes follow.
        let mut buf = BytesMut::from(&[0x89, 0x80 | 126][..]);
        let err = server().decode(&mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
    }

    #[test]
    fn test_fragmented_control_frame_rejected() {
        let mut buf = BytesMut::from(&[0x09, 0x80, 0, 0, 0, 0][..]);
        let err = server().decode(&mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Protocol);
    }

    #[test]
    fn test_64bit_length_msb_rejected_immediately() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x82, 0xFF]);
        buf.extend_from_slice(&(1u64 << 63).to_be_bytes());
        let err = server().decode(&mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MessageTooBig);
        assert!(buf.capacity() < 1024, "declared payload must not be buffered");
    }

    #[test]
    fn test_oversized_length_rejected_without_payload() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x82, 0xFE]);
        buf.extend_from_slice(&60000u16.to_be_bytes());
        let err = server().max_frame_size(1000).decode(&mut buf).unwrap_err();
        assert_eq!(err.kind, ErrorKind::MessageTooBig);
    }

    #[test]
    fn test_encode_small_server_frame() {
        let mut buf = BytesMut::new();
        server().encode(&Frame::text("Hello"), &mut buf);
        insta::assert_snapshot!(hex(&buf), @"81 05 48 65 6c 6c 6f");
    }

    #[test]
    fn test_encode_client_frame_uses_given_key() {
        let mut frame = Frame::text("Hi");
        frame.mask = Some([0x01, 0x02, 0x03, 0x04]);
        let mut buf = BytesMut::new();
        client().encode(&frame, &mut buf);
        insta::assert_snapshot!(hex(&buf), @"81 82 01 02 03 04 49 6b");
    }

    #[test]
    fn test_server_never_masks() {
        let mut frame = Frame::binary(vec![1, 2, 3]);
        frame.mask = Some([9, 9, 9, 9]);
        let mut buf = BytesMut::new();
        server().encode(&frame, &mut buf);
        assert_eq!(&buf[..], &[0x82, 0x03, 1, 2, 3]);
    }

    #[test]
    fn test_client_always_masks() {
        let mut buf = BytesMut::new();
        client().encode(&Frame::binary(vec![0u8; 10]), &mut buf);
        assert_eq!(buf[1] & 0x80, 0x80);
        assert_eq!(buf.len(), 2 + 4 + 10);
    }

    #[test]
    fn test_encode_length_forms() {
        let mut buf = BytesMut::new();
        server().encode(&Frame::binary(vec![0x42u8; 200]), &mut buf);
        assert_eq!(buf[1], 126);
        assert_eq!(&buf[2..4], &200u16.to_be_bytes());

        let mut buf = BytesMut::new();
        server().encode(&Frame::binary(vec![0u8; 65535]), &mut buf);
        assert_eq!(buf[1], 126);

        let mut buf = BytesMut::new();
        server().encode(&Frame::binary(vec![0u8; 65536]), &mut buf);
        assert_eq!(buf[1], 127);
        assert_eq!(&buf[2..10], &65536u64.to_be_bytes());
    }

    #[test]
    fn test_frame_roundtrip_both_directions() {
        let frames = vec![
            Frame::text("round-trip test payload"),
            Frame::binary(vec![7u8; 70000]).with_fin(false),
            Frame::continuation(b"tail".to_vec(), true),
            Frame::ping(b"abc".to_vec()),
            Frame::close(vec![0x03, 0xE8]),
        ];
        for (sender, receiver) in [(client(), server()), (server(), client())] {
            for original in &frames {
                let mut buf = BytesMut::new();
                sender.encode(original, &mut buf);
                let decoded = receiver.decode(&mut buf).unwrap().unwrap();
                assert_eq!(decoded.opcode, original.opcode);
                assert_eq!(decoded.fin, original.fin);
                assert_eq!(decoded.rsv_bits(), original.rsv_bits());
                assert_eq!(decoded.payload, original.payload);
                assert!(buf.is_empty());
            }
        }
    }
}
