//! TLS support for connections
//!
//! `TlsConnection` is the secure variant of [`Connection`](crate::conn::Connection).
//! It encrypts over an inner transport, normally a `TcpStream`, and does not
//! hand that transport out through its public API.
//!
//! # Examples
//!
//! ```no_run
//! use deadpeer::conn::tls::{TlsConfig, TlsVersion};
//! use std::net::TcpListener;
//!
//! // Server with the built-in certificate
//! let tls_config = TlsConfig::server()
//!     .version_range(TlsVersion::Tls12, TlsVersion::Tls13)
//!     .build()
//!     .unwrap();
//!
//! let listener = TcpListener::bind("127.0.0.1:8443").unwrap();
//! let (tcp_stream, _) = listener.accept().unwrap();
//! let conn = tls_config.accept(tcp_stream).unwrap();
//! ```

pub mod builtin_cert;
pub mod config;
pub mod session;

pub use config::{
    ClientConfigBuilder, ServerConfigBuilder, TlsConfig, TlsError, TlsVersion,
};
pub use session::{TlsConnection, Transport};

/// Result type for TLS operations
pub type Result<T> = std::result::Result<T, TlsError>;
