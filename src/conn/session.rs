//! Connection operations
//!
//! This module provides the `Connection` trait shared by plain and TLS
//! connections, and the plain TCP implementation.

use super::{Error, Result};
use std::any::Any;
use std::io::{self, Read, Write};
use std::net::TcpStream;
use std::os::fd::{AsRawFd, RawFd};
use std::time::Duration;

/// Connection operations trait
///
/// Callers only ever see this capability. Which variant sits behind it is
/// not part of the public contract.
pub trait Connection {
    /// Poll the connection for events
    ///
    /// Returns true if the connection is ready for the requested operation
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool>;

    /// Read data from the connection
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Write data to the connection
    fn write(&mut self, buf: &[u8]) -> Result<usize>;

    /// Flush buffered data
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the connection
    fn close(&mut self) -> Result<()>;

    /// Concrete type name, for diagnostics only
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Secure-transport hook, see [`SecureTransport`]
    #[doc(hidden)]
    fn as_secure(&self) -> Option<&dyn SecureTransport> {
        None
    }
}

/// Access to the transport a secure connection is layered on.
///
/// Only the handle unwrapper in [`crate::tcp`] is meant to use this. Writing
/// to the returned transport directly would bypass the encryption layer.
#[doc(hidden)]
pub trait SecureTransport {
    /// The inner transport, type-erased
    fn transport(&self) -> &dyn Any;

    /// Type name of the inner transport
    fn transport_type_name(&self) -> &'static str;
}

/// Poll events
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollEvents {
    Read,
    Write,
    Both,
}

/// `poll(2)` timeout in whole milliseconds, rounded up so a non-zero
/// timeout never turns into a non-blocking poll
fn poll_timeout_ms(timeout: Option<Duration>) -> i32 {
    match timeout {
        Some(d) => d.as_nanos().div_ceil(1_000_000).min(i32::MAX as u128) as i32,
        None => -1, // infinite
    }
}

/// Wait for `events` on a raw file descriptor
pub(crate) fn poll_fd(fd: RawFd, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
    use libc::{poll, pollfd, POLLIN, POLLOUT};

    let mut pfd = pollfd {
        fd,
        events: match events {
            PollEvents::Read => POLLIN,
            PollEvents::Write => POLLOUT,
            PollEvents::Both => POLLIN | POLLOUT,
        },
        revents: 0,
    };

    let result = unsafe { poll(&mut pfd as *mut pollfd, 1, poll_timeout_ms(timeout)) };

    if result < 0 {
        return Err(Error::Io(io::Error::last_os_error()));
    }

    Ok(result > 0)
}

/// Read with a deadline
///
/// Fails with `Error::Timeout` if nothing arrives in time and with
/// `Error::ConnectionClosed` if the peer closed the stream.
pub fn read_timeout(
    conn: &mut dyn Connection,
    buf: &mut [u8],
    timeout: Option<Duration>,
) -> Result<usize> {
    if !conn.poll(PollEvents::Read, timeout)? {
        return Err(Error::Timeout);
    }

    match conn.read(buf)? {
        0 if !buf.is_empty() => Err(Error::ConnectionClosed),
        n => Ok(n),
    }
}

/// Plain (unencrypted) TCP connection
pub struct PlainConnection {
    stream: TcpStream,
}

impl PlainConnection {
    /// Create a new plain connection from a TCP stream
    pub fn new(stream: TcpStream) -> Self {
        PlainConnection { stream }
    }

    /// Get a reference to the underlying stream
    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }
}

impl Connection for PlainConnection {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        poll_fd(self.stream.as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(Error::from)
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(Error::from)
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush().map_err(Error::from)
    }

    fn close(&mut self) -> Result<()> {
        use std::net::Shutdown;
        self.stream
            .shutdown(Shutdown::Both)
            .map_err(Error::from)
    }
}
