//! Connection abstraction
//!
//! Connections are handed around as opaque `dyn Connection` values, the same
//! way the host treats any stream once the handshake is done:
//!
//! - `Connection` defines the operations (poll, read, write, flush, close)
//! - `PlainConnection` is an unencrypted TCP connection
//! - `tls::TlsConnection` is the secure variant, hiding its inner transport
//!
//! # Examples
//!
//! ```no_run
//! use deadpeer::conn::tls::TlsConfig;
//! use deadpeer::conn::Connection;
//! use std::net::TcpStream;
//!
//! let config = TlsConfig::client().build().unwrap();
//! let stream = TcpStream::connect("127.0.0.1:8443").unwrap();
//! let mut conn: Box<dyn Connection> = Box::new(config.connect(stream).unwrap());
//!
//! deadpeer::tcp::harden(conn.as_ref()).unwrap();
//! conn.write(b"ping").unwrap();
//! ```

pub mod session;
pub mod tls;

pub use session::{read_timeout, Connection, PlainConnection, PollEvents, SecureTransport};

/// Result type for connection operations
pub type Result<T> = std::result::Result<T, Error>;

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timeout")]
    Timeout,

    #[error("Connection closed")]
    ConnectionClosed,
}
