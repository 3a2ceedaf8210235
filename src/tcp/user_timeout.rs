//! `TCP_USER_TIMEOUT`, where the platform has it
//!
//! Only Linux and its relatives implement the option. Elsewhere setting it is
//! a no-op and a dead peer is detected by keepalive probes alone, which do not
//! fire while unacknowledged data is queued.

use socket2::Socket;
use std::io;
use std::time::Duration;

/// Whether `TCP_USER_TIMEOUT` is applied on this platform
pub const USER_TIMEOUT_SUPPORTED: bool =
    cfg!(any(target_os = "android", target_os = "fuchsia", target_os = "linux"));

#[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
pub(crate) fn set_user_timeout(socket: &Socket, timeout: Duration) -> io::Result<()> {
    socket.set_tcp_user_timeout(Some(timeout))
}

#[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
pub(crate) fn set_user_timeout(_socket: &Socket, timeout: Duration) -> io::Result<()> {
    log::debug!(
        "TCP_USER_TIMEOUT not available on this platform, skipping {:?}; relying on keepalive",
        timeout
    );
    Ok(())
}
