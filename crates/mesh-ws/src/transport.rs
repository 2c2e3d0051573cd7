//! The byte channel a connection writes to.
//!
//! Reading is not part of the trait: whoever owns the read half feeds bytes
//! into [`Connection::receive`](crate::Connection::receive).

use std::io::{self, Write};
use std::net::{Shutdown, TcpStream};

pub trait Transport {
    /// Write all of `bytes`, in order.
    fn send(&mut self, bytes: &[u8]) -> io::Result<()>;

    /// Close the channel in both directions.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_all(bytes)?;
        self.flush()
    }

    fn shutdown(&mut self) -> io::Result<()> {
        match TcpStream::shutdown(self, Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }
}

/// In-memory transport that collects everything written to it.
#[derive(Debug, Default)]
pub struct BufferTransport {
    written: Vec<u8>,
    shut_down: bool,
}

impl BufferTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Drain the bytes written so far.
    pub fn take_written(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.written)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }
}

impl Transport for BufferTransport {
    fn send(&mut self, bytes: &[u8]) -> io::Result<()> {
        if self.shut_down {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "transport shut down"));
        }
        self.written.extend_from_slice(bytes);
        Ok(())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        self.shut_down = true;
        Ok(())
    }
}
