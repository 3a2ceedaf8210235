//! TLS connection
//!
//! This module implements the `Connection` trait for TLS connections. The
//! transport under the TLS layer is deliberately not exposed through the
//! public API.

use super::config::{TlsConfig, TlsError};
use crate::conn::session::{poll_fd, Connection, PollEvents, SecureTransport};
use crate::conn::{Error, Result};
use openssl::ssl::{HandshakeError, Ssl, SslStream};
use std::any::Any;
use std::io::{Read, Write};
use std::os::fd::AsRawFd;
use std::time::Duration;

/// A byte stream that TLS can be layered on
pub trait Transport: Read + Write + AsRawFd + Any {}

impl<T: Read + Write + AsRawFd + Any> Transport for T {}

/// TLS connection
///
/// Wraps an OpenSSL `SslStream` over some transport, usually a `TcpStream`.
pub struct TlsConnection<S: Transport> {
    stream: SslStream<S>,
    failed: bool,
}

fn handshake_error<S>(err: HandshakeError<S>) -> TlsError {
    match err {
        HandshakeError::SetupFailure(stack) => TlsError::OpenSsl(stack),
        HandshakeError::Failure(mid) | HandshakeError::WouldBlock(mid) => {
            TlsError::HandshakeFailed(mid.error().to_string())
        }
    }
}

impl<S: Transport> TlsConnection<S> {
    /// Create a client TLS connection (perform handshake)
    pub(crate) fn connect(stream: S, config: &TlsConfig) -> std::result::Result<Self, TlsError> {
        let mut ssl = Ssl::new(&config.ctx)?;

        if let Some(ref servername) = config.servername {
            ssl.set_hostname(servername)?;
        }

        // Blocking handshake
        let stream = ssl.connect(stream).map_err(handshake_error)?;

        Ok(TlsConnection {
            stream,
            failed: false,
        })
    }

    /// Accept a client connection with TLS (perform handshake)
    pub(crate) fn accept(stream: S, config: &TlsConfig) -> std::result::Result<Self, TlsError> {
        let ssl = Ssl::new(&config.ctx)?;

        let stream = ssl.accept(stream).map_err(handshake_error)?;

        Ok(TlsConnection {
            stream,
            failed: false,
        })
    }

    /// Negotiated protocol version, e.g. "TLSv1.3"
    pub fn version(&self) -> &'static str {
        self.stream.ssl().version_str()
    }

    /// Check if an I/O operation failed
    pub fn failed(&self) -> bool {
        self.failed
    }
}

impl<S: Transport> SecureTransport for TlsConnection<S> {
    fn transport(&self) -> &dyn Any {
        self.stream.get_ref()
    }

    fn transport_type_name(&self) -> &'static str {
        std::any::type_name::<S>()
    }
}

impl<S: Transport> Connection for TlsConnection<S> {
    fn poll(&self, events: PollEvents, timeout: Option<Duration>) -> Result<bool> {
        // Decrypted bytes may already be buffered inside OpenSSL
        if matches!(events, PollEvents::Read | PollEvents::Both) && self.stream.ssl().pending() > 0 {
            return Ok(true);
        }

        poll_fd(self.stream.get_ref().as_raw_fd(), events, timeout)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        self.stream.read(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.stream.write(buf).map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.stream.flush().map_err(|e| {
            self.failed = true;
            Error::Io(e)
        })
    }

    /// Sends close_notify; the transport itself is closed on drop
    fn close(&mut self) -> Result<()> {
        // close_notify only makes sense on a healthy stream
        if !self.failed {
            let _ = self.stream.shutdown();
        }
        Ok(())
    }

    fn as_secure(&self) -> Option<&dyn SecureTransport> {
        Some(self)
    }
}
