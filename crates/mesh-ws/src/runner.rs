//! Blocking thread-per-connection driver for a [`Connection`] over TCP.
//!
//! [`spawn`] puts the connection behind a mutex and starts one reader thread
//! on a clone of the socket. The reader blocks in `read` with a timeout no
//! longer than the next connection deadline, so keepalive pings and the
//! close timeout fire on time without a separate timer thread. The lock is
//! never held across a blocking read.
//!
//! Writes do happen under the lock, from [`WsHandle`] senders and from the
//! reader alike. The socket gets a write timeout (see [`write_timeout`]), so
//! a peer that stops reading turns a stalled write into a transport error
//! that fails the connection instead of holding the lock indefinitely.
//!
//! Events arrive on the returned channel in the order the connection raised
//! them; the final event is always [`Event::Close`].

use std::io::{self, Read};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::close::CloseCode;
use crate::config::{ConnectionConfig, Negotiated};
use crate::connection::{Connection, State};
use crate::error::WsError;
use crate::event::{Event, Message};

/// Upper bound on a single blocking read, so the reader notices a
/// connection ended from another thread.
const MAX_READ_WAIT: Duration = Duration::from_millis(100);

const READ_BUFFER_SIZE: usize = 16 * 1024;

type SharedConnection = Arc<Mutex<Connection<TcpStream, Sender<Event>>>>;

/// Cloneable handle for sending on a running connection.
#[derive(Clone)]
pub struct WsHandle {
    conn: SharedConnection,
}

impl WsHandle {
    pub fn send_text(&self, text: &str) -> Result<(), WsError> {
        self.conn.lock().send_text(text)
    }

    pub fn send_binary(&self, data: &[u8]) -> Result<(), WsError> {
        self.conn.lock().send_binary(data)
    }

    pub fn send(&self, message: impl Into<Message>) -> Result<(), WsError> {
        self.conn.lock().send(message)
    }

    pub fn ping(&self, data: &[u8]) -> Result<(), WsError> {
        self.conn.lock().ping(data)
    }

    /// Start the close handshake. The reader thread finishes it, or fails
    /// the connection when the close timeout passes.
    pub fn close(&self, code: CloseCode, reason: &str) -> Result<(), WsError> {
        self.conn.lock().close(code, reason, Instant::now())
    }

    pub fn drop_connection(&self, code: CloseCode, reason: &str) {
        self.conn.lock().drop_connection(code, reason);
    }

    pub fn state(&self) -> State {
        self.conn.lock().state()
    }

    pub fn close_code(&self) -> Option<CloseCode> {
        self.conn.lock().close_code()
    }

    pub fn remote_address(&self) -> String {
        self.conn.lock().remote_address().to_string()
    }
}

/// Drive a connection over `stream`, whose opening handshake has already
/// completed, on a dedicated reader thread.
///
/// Fails with [`WsError::Config`] if `config` does not validate.
pub fn spawn(
    stream: TcpStream,
    negotiated: Negotiated,
    config: ConnectionConfig,
) -> Result<(WsHandle, Receiver<Event>), WsError> {
    let (tx, rx) = crossbeam_channel::unbounded();
    let name = format!("ws-reader-{}", negotiated.remote_address);
    let send_timeout = write_timeout(&config);
    let conn = Connection::new(stream, negotiated, config, tx, Instant::now())?;
    conn.transport().set_write_timeout(Some(send_timeout))?;
    let reader = conn.transport().try_clone()?;

    let conn = Arc::new(Mutex::new(conn));
    let reader_conn = conn.clone();
    std::thread::Builder::new()
        .name(name)
        .spawn(move || reader_loop(reader, reader_conn))?;

    Ok((WsHandle { conn }, rx))
}

/// Longest a socket write may go without progress before it fails.
///
/// Bounded by the close timeout, and by the keepalive grace period when a
/// silent peer is dropped, so neither deadline can be outlived by a write
/// that holds the connection lock.
pub fn write_timeout(config: &ConnectionConfig) -> Duration {
    let mut timeout = config.close_timeout;
    if config.keepalive && config.drop_on_keepalive_timeout {
        timeout = timeout.min(config.keepalive_grace_period);
    }
    timeout.max(Duration::from_millis(1))
}

fn reader_loop(mut stream: TcpStream, conn: SharedConnection) {
    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let wait = {
            let mut c = conn.lock();
            let now = Instant::now();
            if let Err(e) = c.poll_timers(now) {
                debug!(error = %e, "connection timer fired");
            }
            if c.state().is_terminal() {
                break;
            }
            read_wait(c.next_deadline(), now)
        };

        if let Err(e) = stream.set_read_timeout(Some(wait)) {
            warn!(error = %e, "failed to set read timeout");
            conn.lock().transport_closed();
            break;
        }

        match stream.read(&mut buf) {
            Ok(0) => {
                conn.lock().transport_closed();
                break;
            }
            Ok(n) => {
                trace!(bytes = n, "read");
                let mut c = conn.lock();
                if let Err(e) = c.receive(&buf[..n], Instant::now()) {
                    debug!(error = %e, "connection failed while receiving");
                }
                if c.state().is_terminal() {
                    break;
                }
            }
            // A read timeout surfaces as WouldBlock on Unix and TimedOut on Windows.
            Err(e) if matches!(
                e.kind(),
                io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
            ) => {}
            Err(e) => {
                debug!(error = %e, "read failed");
                conn.lock().transport_closed();
                break;
            }
        }
    }
    trace!("reader thread exiting");
}

/// How long the next read may block. `set_read_timeout` rejects zero.
fn read_wait(deadline: Option<Instant>, now: Instant) -> Duration {
    deadline
        .map(|d| d.saturating_duration_since(now))
        .unwrap_or(MAX_READ_WAIT)
        .clamp(Duration::from_millis(1), MAX_READ_WAIT)
}
