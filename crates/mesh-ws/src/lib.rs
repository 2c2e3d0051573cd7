//! WebSocket (RFC 6455) wire engine.
//!
//! Turns a byte stream whose HTTP upgrade has already completed into
//! messages and events, and back. The HTTP handshake itself, TLS and
//! compression are left to the embedding server.
//!
//! ## Modules
//!
//! - [`frame`]: Frame type and the [`FrameCodec`] (parse, serialize, mask)
//! - [`assembler`]: Reassembly of fragmented messages with size limits
//! - [`keepalive`]: Ping interval and grace-period deadlines
//! - [`close`]: Close codes, close payloads and the close handshake
//! - [`connection`]: The per-connection state machine
//! - [`config`]: [`ConnectionConfig`] (TOML-loadable) and handshake results
//! - [`runner`]: Thread-per-connection driver over `TcpStream`
//!
//! ## Driving a connection
//!
//! [`Connection`] never reads on its own. Feed it bytes with
//! [`Connection::receive`], call [`Connection::poll_timers`] by
//! [`Connection::next_deadline`], and report EOF with
//! [`Connection::transport_closed`]. [`runner::spawn`] does all three on a
//! dedicated thread.

pub mod assembler;
pub mod close;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod extension;
pub mod frame;
pub mod keepalive;
pub mod runner;
pub mod transport;

pub use assembler::FragmentAssembler;
pub use close::{CloseCode, CloseHandshake};
pub use config::{ConnectionConfig, Negotiated};
pub use connection::{Connection, State};
pub use error::{ConfigError, ErrorKind, ProtocolError, TimeoutKind, UsageError, WsError};
pub use event::{Event, EventSink, Message};
pub use extension::FrameExtension;
pub use frame::{apply_mask, Frame, FrameCodec, Opcode, Role};
pub use keepalive::{KeepaliveAction, KeepaliveTimer};
pub use runner::{spawn, WsHandle};
pub use transport::{BufferTransport, Transport};
