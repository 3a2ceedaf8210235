//! TCP dead-peer hardening
//!
//! By default Linux keeps a connection to a vanished peer open for up to
//! twenty minutes when data sits unacknowledged in the send queue, since the
//! retransmission timers keep the keepalive timer from firing. This module
//! bounds that:
//!
//! 1. [`extract_transport`] finds the `TcpStream` under a TLS connection
//! 2. [`apply_timeouts`] sets `TCP_USER_TIMEOUT` to 30s and enables
//!    keepalive with a 3s probe period
//!
//! [`harden`] does both. Call it after the handshake and before the
//! connection is handed to its read/write loops.

mod extract;
mod timeouts;
mod user_timeout;

pub use extract::extract_transport;
pub use timeouts::{apply_timeouts, RawTransport, TimeoutSnapshot, KEEPALIVE_PERIOD, USER_TIMEOUT};
pub use user_timeout::USER_TIMEOUT_SUPPORTED;

use crate::conn::Connection;
use std::fmt;

/// Result type for hardening operations
pub type Result<T> = std::result::Result<T, Error>;

/// Hardening errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The connection is not a TLS connection. Not retryable.
    #[error("Connection is not a TLS connection: {found}")]
    NotSecureTransport { found: &'static str },

    /// The TLS connection is layered on something other than a `TcpStream`.
    #[error("TLS connection transport is not a TCP stream: {found}")]
    NotRawTransport { found: &'static str },

    /// The OS rejected one of the socket options.
    #[error("Failed to set {option}: {source}")]
    SocketOption {
        option: SocketOption,
        #[source]
        source: std::io::Error,
    },
}

/// Socket setting applied by [`apply_timeouts`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketOption {
    /// `TCP_USER_TIMEOUT`
    UserTimeout,
    /// `SO_KEEPALIVE`
    KeepAlive,
    /// Keepalive idle time and probe interval
    KeepAlivePeriod,
}

impl fmt::Display for SocketOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SocketOption::UserTimeout => write!(f, "TCP_USER_TIMEOUT"),
            SocketOption::KeepAlive => write!(f, "SO_KEEPALIVE"),
            SocketOption::KeepAlivePeriod => write!(f, "keepalive period"),
        }
    }
}

/// Extract the TCP stream under `conn` and apply the dead-peer timeouts
pub fn harden(conn: &dyn Connection) -> Result<()> {
    let stream = extract_transport(conn)?;
    apply_timeouts(stream)?;

    log::debug!(
        "Applied TCP timeouts to connection with {}",
        stream
            .peer_addr()
            .map(|addr| addr.to_string())
            .unwrap_or_else(|_| "unknown peer".to_string())
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_option_error_names_step() {
        let err = Error::SocketOption {
            option: SocketOption::KeepAlive,
            source: std::io::Error::from_raw_os_error(libc::EBADF),
        };

        let msg = err.to_string();
        assert!(msg.starts_with("Failed to set SO_KEEPALIVE: "));
        assert!(std::error::Error::source(&err).is_some());
    }
}
