//! One established WebSocket connection.
//!
//! [`Connection`] owns the write half of the transport, the receive buffer,
//! the fragment assembler and both timers. It does no I/O scheduling of its
//! own: the owner feeds inbound bytes to [`Connection::receive`], calls
//! [`Connection::poll_timers`] no later than [`Connection::next_deadline`],
//! and reports end-of-stream with [`Connection::transport_closed`]. Every
//! method runs to completion, so frames are handled strictly in arrival
//! order.
//!
//! ```text
//!          close() / peer Close          peer Close (ack)
//!   Open ───────────────────────▶ Closing ───────────────▶ Closed
//!    │   peer Close (echoed) ──────────────────────────────▶ Closed
//!    │                                  │ close timeout
//!    └── protocol error / drop / keepalive timeout / EOF ──▶ Failed
//! ```

use std::time::Instant;

use bytes::BytesMut;
use tracing::{debug, info, trace, warn};

use crate::assembler::FragmentAssembler;
use crate::close::{encode_close_payload, parse_close_payload, validate_close_request, CloseCode, CloseHandshake};
use crate::config::{ConnectionConfig, Negotiated};
use crate::error::{ConfigError, ProtocolError, TimeoutKind, UsageError, WsError};
use crate::event::{Event, EventSink, Message};
use crate::extension::FrameExtension;
use crate::frame::{Frame, FrameCodec, Opcode, Role, MAX_CONTROL_PAYLOAD};
use crate::keepalive::{KeepaliveAction, KeepaliveTimer};
use crate::transport::Transport;

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Open,
    /// We sent a Close frame and are waiting for the peer's.
    Closing,
    /// The close handshake completed.
    Closed,
    /// The connection ended without a completed handshake.
    Failed,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Closed | State::Failed)
    }
}

pub struct Connection<T: Transport, E: EventSink> {
    negotiated: Negotiated,
    config: ConnectionConfig,
    codec: FrameCodec,
    transport: T,
    events: E,
    state: State,
    recv_buf: BytesMut,
    assembler: FragmentAssembler,
    keepalive: Option<KeepaliveTimer>,
    close: CloseHandshake,
    close_code: Option<CloseCode>,
    close_reason: String,
    extensions: Vec<Box<dyn FrameExtension>>,
}

impl<T: Transport, E: EventSink> Connection<T, E> {
    /// Wrap a transport whose opening handshake has completed.
    ///
    /// Fails if `config` does not pass [`ConnectionConfig::validate`].
    pub fn new(
        transport: T,
        negotiated: Negotiated,
        config: ConnectionConfig,
        events: E,
        now: Instant,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let codec = FrameCodec::new(negotiated.role).max_frame_size(config.max_frame_size);
        let assembler = FragmentAssembler::new(config.max_message_size, config.assemble_fragments);
        let keepalive = config.keepalive.then(|| {
            KeepaliveTimer::new(
                config.keepalive_interval,
                config.keepalive_grace_period,
                config.drop_on_keepalive_timeout,
                now,
            )
        });
        let close = CloseHandshake::new(config.close_timeout);
        debug!(
            remote = %negotiated.remote_address,
            role = ?negotiated.role,
            protocol = ?negotiated.protocol,
            "websocket connection open"
        );
        Ok(Self {
            negotiated,
            config,
            codec,
            transport,
            events,
            state: State::Open,
            recv_buf: BytesMut::new(),
            assembler,
            keepalive,
            close,
            close_code: None,
            close_reason: String::new(),
            extensions: Vec::new(),
        })
    }

    /// Register a frame transform. Ignored unless the handshake negotiated
    /// an extension of the same name.
    pub fn with_extension(mut self, extension: Box<dyn FrameExtension>) -> Self {
        if !self.negotiated.has_extension(extension.name()) {
            debug!(extension = extension.name(), "extension not negotiated, ignoring");
            return self;
        }
        let claimed = self.extensions.iter().fold(extension.rsv_bits(), |bits, ext| bits | ext.rsv_bits());
        self.codec = self.codec.clone().allowed_rsv(claimed);
        self.extensions.push(extension);
        self
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == State::Open
    }

    pub fn role(&self) -> Role {
        self.negotiated.role
    }

    pub fn protocol(&self) -> Option<&str> {
        self.negotiated.protocol.as_deref()
    }

    pub fn extensions(&self) -> &[String] {
        &self.negotiated.extensions
    }

    pub fn remote_address(&self) -> &str {
        &self.negotiated.remote_address
    }

    pub fn version(&self) -> u8 {
        self.negotiated.version
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Set once the connection has ended.
    pub fn close_code(&self) -> Option<CloseCode> {
        self.close_code
    }

    pub fn close_reason(&self) -> &str {
        &self.close_reason
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    /// The earliest instant at which [`Connection::poll_timers`] has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        match self.state {
            State::Open => self.keepalive.as_ref().and_then(KeepaliveTimer::next_deadline),
            State::Closing => self.close.deadline(),
            State::Closed | State::Failed => None,
        }
    }

    // ── Inbound ──────────────────────────────────────────────────────

    /// Feed bytes read from the transport and process every complete frame.
    ///
    /// A protocol violation fails the connection (error event, best-effort
    /// Close, close event) and is also returned.
    pub fn receive(&mut self, bytes: &[u8], now: Instant) -> Result<(), WsError> {
        if self.state.is_terminal() {
            return Ok(());
        }
        if !bytes.is_empty() {
            if let Some(keepalive) = self.keepalive.as_mut() {
                keepalive.reset(now);
            }
        }
        self.recv_buf.extend_from_slice(bytes);

        while !self.state.is_terminal() {
            match self.codec.decode(&mut self.recv_buf) {
                Ok(Some(frame)) => self.handle_frame(frame)?,
                Ok(None) => break,
                Err(err) => return Err(self.fail(err)),
            }
        }
        Ok(())
    }

    /// The peer closed the byte stream.
    pub fn transport_closed(&mut self) {
        if self.state.is_terminal() {
            return;
        }
        debug!(remote = %self.negotiated.remote_address, state = ?self.state, "transport closed by peer");
        self.finish(
            State::Failed,
            CloseCode::Abnormal,
            "connection closed without close handshake".to_string(),
        );
    }

    fn handle_frame(&mut self, mut frame: Frame) -> Result<(), WsError> {
        trace!(opcode = ?frame.opcode, fin = frame.fin, len = frame.payload.len(), "frame received");
        match frame.opcode {
            Opcode::Ping => {
                if self.state == State::Open {
                    self.transmit_frames(&[Frame::pong(frame.payload)])?;
                }
                Ok(())
            }
            // Any inbound bytes already reset the keepalive timer.
            Opcode::Pong => Ok(()),
            Opcode::Close => self.handle_close_frame(&frame.payload),
            Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                if self.state != State::Open {
                    trace!("ignoring data frame while closing");
                    return Ok(());
                }
                let decoded = self
                    .extensions
                    .iter_mut()
                    .try_for_each(|extension| extension.decode(&mut frame));
                if let Err(err) = decoded {
                    return Err(self.fail(err));
                }
                let raw = (!self.config.assemble_fragments).then(|| frame.clone());
                let message = match self.assembler.push(frame) {
                    Ok(message) => message,
                    Err(err) => return Err(self.fail(err)),
                };
                // Raw frames are raised only once the assembler has accepted them.
                if let Some(raw) = raw {
                    self.events.emit(Event::Frame(raw));
                }
                if let Some(message) = message {
                    self.events.emit(Event::Message(message));
                }
                Ok(())
            }
        }
    }

    fn handle_close_frame(&mut self, payload: &[u8]) -> Result<(), WsError> {
        let (peer_code, reason) = match parse_close_payload(payload) {
            Ok(Some((code, reason))) => (Some(code), reason),
            Ok(None) => (None, String::new()),
            Err(err) => return Err(self.fail(err)),
        };

        match self.state {
            State::Open => {
                debug!(remote = %self.negotiated.remote_address, code = ?peer_code, "peer initiated close");
                let echo = self.close.respond(peer_code);
                if let Err(e) = self.send_raw(&[Frame::close(echo)]) {
                    debug!(error = %e, "failed to echo close frame");
                }
                self.finish(State::Closed, peer_code.unwrap_or(CloseCode::NotProvided), reason);
            }
            State::Closing => {
                let code = self.close.acknowledge(peer_code);
                self.finish(State::Closed, code, reason);
            }
            State::Closed | State::Failed => {}
        }
        Ok(())
    }

    // ── Outbound ─────────────────────────────────────────────────────

    pub fn send_text(&mut self, text: &str) -> Result<(), WsError> {
        self.send_message(Opcode::Text, text.as_bytes())
    }

    pub fn send_binary(&mut self, data: &[u8]) -> Result<(), WsError> {
        self.send_message(Opcode::Binary, data)
    }

    /// Send a text or binary message depending on what was passed.
    pub fn send(&mut self, message: impl Into<Message>) -> Result<(), WsError> {
        let message = message.into();
        self.send_message(message.opcode(), message.as_bytes())
    }

    pub fn ping(&mut self, data: &[u8]) -> Result<(), WsError> {
        self.send_control(Frame::ping(data))
    }

    pub fn pong(&mut self, data: &[u8]) -> Result<(), WsError> {
        self.send_control(Frame::pong(data))
    }

    /// Transmit a caller-built frame unchanged, except that masking is
    /// forced to match this endpoint's role.
    pub fn send_frame(&mut self, frame: Frame) -> Result<(), WsError> {
        self.ensure_open()?;
        self.transmit_frames(&[frame])
    }

    fn send_control(&mut self, frame: Frame) -> Result<(), WsError> {
        self.ensure_open()?;
        if frame.payload.len() > MAX_CONTROL_PAYLOAD {
            return Err(UsageError::ControlPayloadTooLarge(frame.payload.len()).into());
        }
        self.transmit_frames(&[frame])
    }

    fn send_message(&mut self, opcode: Opcode, payload: &[u8]) -> Result<(), WsError> {
        self.ensure_open()?;
        let threshold = self.config.fragmentation_threshold;
        let mut frames = if self.config.fragment_outgoing && payload.len() > threshold {
            let count = payload.len().div_ceil(threshold);
            payload
                .chunks(threshold)
                .enumerate()
                .map(|(i, chunk)| {
                    let opcode = if i == 0 { opcode } else { Opcode::Continuation };
                    Frame::new(opcode, chunk).with_fin(i + 1 == count)
                })
                .collect::<Vec<_>>()
        } else {
            vec![Frame::new(opcode, payload)]
        };
        for frame in frames.iter_mut() {
            for extension in self.extensions.iter_mut() {
                extension.encode(frame);
            }
        }
        self.transmit_frames(&frames)
    }

    fn ensure_open(&self) -> Result<(), UsageError> {
        if self.state != State::Open {
            return Err(UsageError::NotOpen);
        }
        Ok(())
    }

    /// Encode and write frames. A write failure is fatal to the connection.
    fn transmit_frames(&mut self, frames: &[Frame]) -> Result<(), WsError> {
        if let Err(e) = self.send_raw(frames) {
            warn!(remote = %self.negotiated.remote_address, error = %e, "transport write failed");
            self.finish(State::Failed, CloseCode::Abnormal, format!("transport error: {}", e));
            return Err(WsError::Transport(e));
        }
        Ok(())
    }

    fn send_raw(&mut self, frames: &[Frame]) -> std::io::Result<()> {
        let mut out = BytesMut::new();
        for frame in frames {
            self.codec.encode(frame, &mut out);
        }
        self.transport.send(&out)
    }

    // ── Closing ──────────────────────────────────────────────────────

    /// Start the close handshake. The connection moves to `Closing` until the
    /// peer answers or `close_timeout` passes.
    pub fn close(&mut self, code: CloseCode, reason: &str, now: Instant) -> Result<(), WsError> {
        self.ensure_open()?;
        validate_close_request(code, reason)?;
        debug!(remote = %self.negotiated.remote_address, code = u16::from(code), "initiating close");
        self.transmit_frames(&[Frame::close(encode_close_payload(code, reason))])?;
        if let Some(keepalive) = self.keepalive.as_mut() {
            keepalive.cancel();
        }
        self.state = State::Closing;
        self.close.initiate(code, now);
        Ok(())
    }

    /// Tear the connection down without waiting for the peer. A Close frame
    /// is sent on a best-effort basis when `code` may appear on the wire.
    pub fn drop_connection(&mut self, code: CloseCode, reason: &str) {
        if self.state.is_terminal() {
            return;
        }
        if code.is_sendable() {
            if let Err(e) = self.send_raw(&[Frame::close(encode_close_payload(code, reason))]) {
                debug!(error = %e, "failed to send close frame while dropping");
            }
        }
        self.finish(State::Failed, code, reason.to_string());
    }

    /// Fire any due close or keepalive deadline.
    pub fn poll_timers(&mut self, now: Instant) -> Result<(), WsError> {
        match self.state {
            State::Closing if self.close.is_expired(now) => {
                warn!(remote = %self.negotiated.remote_address, "close response not received, forcing socket end");
                self.finish(
                    State::Failed,
                    CloseCode::Abnormal,
                    "close acknowledgment timed out".to_string(),
                );
                Err(WsError::Timeout(TimeoutKind::CloseAck))
            }
            State::Open => {
                let action = match self.keepalive.as_mut() {
                    Some(keepalive) => keepalive.poll(now),
                    None => KeepaliveAction::Idle,
                };
                match action {
                    KeepaliveAction::Idle => Ok(()),
                    KeepaliveAction::SendPing => {
                        trace!(remote = %self.negotiated.remote_address, "keepalive ping");
                        self.transmit_frames(&[Frame::ping(Vec::new())])
                    }
                    KeepaliveAction::Drop => {
                        warn!(remote = %self.negotiated.remote_address, "peer not responding to keepalive, dropping");
                        if let Err(e) = self.send_raw(&[Frame::close(encode_close_payload(
                            CloseCode::GoingAway,
                            "peer not responding",
                        ))]) {
                            debug!(error = %e, "failed to send close frame on keepalive timeout");
                        }
                        self.finish(State::Failed, CloseCode::Abnormal, "peer not responding".to_string());
                        Err(WsError::Timeout(TimeoutKind::KeepaliveGrace))
                    }
                }
            }
            _ => Ok(()),
        }
    }

    /// Report a protocol violation, send a best-effort Close and fail.
    ///
    /// No Close is sent while `Closing`: ours is already on the wire.
    fn fail(&mut self, err: ProtocolError) -> WsError {
        warn!(
            remote = %self.negotiated.remote_address,
            kind = %err.kind,
            "protocol error: {}",
            err.description
        );
        self.events.emit(Event::Error {
            kind: err.kind,
            description: err.description.clone(),
        });
        let code = err.close_code();
        if self.state == State::Open {
            if let Err(e) = self.send_raw(&[Frame::close(encode_close_payload(code, &err.description))]) {
                debug!(error = %e, "failed to send close frame after protocol error");
            }
        }
        self.finish(State::Failed, code, err.description.clone());
        WsError::Protocol(err)
    }

    /// Enter a terminal state: cancel timers, release buffers, shut the
    /// transport and raise the close event.
    fn finish(&mut self, state: State, code: CloseCode, description: String) {
        self.state = state;
        self.close_code = Some(code);
        self.close_reason = description.clone();
        if let Some(keepalive) = self.keepalive.as_mut() {
            keepalive.cancel();
        }
        self.close.cancel();
        self.assembler.reset();
        self.recv_buf = BytesMut::new();
        if let Err(e) = self.transport.shutdown() {
            debug!(error = %e, "transport shutdown failed");
        }
        info!(
            remote = %self.negotiated.remote_address,
            code = u16::from(code),
            state = ?state,
            "websocket connection closed"
        );
        self.events.emit(Event::Close { code, description });
    }
}
