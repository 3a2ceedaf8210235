//! Handle unwrapping
//!
//! The TLS layer does not give callers its transport, since writing to it
//! directly would bypass encryption. Setting socket timeouts is the one
//! exception we make: it only changes how fast a dead peer is noticed, never
//! what is sent or how it is protected.
//!
//! The route in is the `SecureTransport` hook, which in turn relies on
//! OpenSSL's `SslStream::get_ref`. It assumes the TLS connection owns exactly
//! one transport for its whole life. Nothing outside this file should use it.

use super::{Error, Result};
use crate::conn::Connection;
use std::net::TcpStream;

/// Get the `TcpStream` a TLS connection is layered on
///
/// The returned reference is the connection's own socket, so options set
/// through it apply to the connection. Nothing is modified here.
///
/// Fails with [`Error::NotSecureTransport`] for anything that is not a TLS
/// connection, and with [`Error::NotRawTransport`] if the TLS connection runs
/// over something other than TCP.
pub fn extract_transport(conn: &dyn Connection) -> Result<&TcpStream> {
    let secure = conn.as_secure().ok_or(Error::NotSecureTransport {
        found: conn.type_name(),
    })?;

    secure
        .transport()
        .downcast_ref::<TcpStream>()
        .ok_or(Error::NotRawTransport {
            found: secure.transport_type_name(),
        })
}
