//! deadpeer - dead-peer detection hardening for TLS-wrapped TCP connections
//!
//! This crate locates the raw TCP socket underneath an opaque, possibly
//! encrypted connection and configures `TCP_USER_TIMEOUT` and TCP keepalive
//! on it, so that a peer which disappears is noticed within seconds instead
//! of the OS default of many minutes.
//!
//! The `tokens` module carries the expired-token housekeeping task that runs
//! next to it in the host daemon.

pub mod conn;
pub mod tcp;
pub mod tokens;
