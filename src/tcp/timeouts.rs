//! Timeout configuration

use super::user_timeout::set_user_timeout;
use super::{Error, Result, SocketOption};
use socket2::{SockRef, Socket, TcpKeepalive};
use std::io;
use std::net::TcpStream;
use std::time::Duration;

/// How long sent data may stay unacknowledged before the kernel drops the
/// connection with `ETIMEDOUT`
pub const USER_TIMEOUT: Duration = Duration::from_secs(30);

/// Keepalive idle time and probe interval
pub const KEEPALIVE_PERIOD: Duration = Duration::from_secs(3);

/// Socket controls needed for dead-peer detection
pub trait RawTransport {
    /// Bound the time transmitted data may remain unacknowledged
    fn set_user_timeout(&self, timeout: Duration) -> io::Result<()>;

    /// Enable or disable keepalive probes
    fn set_keepalive(&self, enabled: bool) -> io::Result<()>;

    /// Set the idle time before the first probe and the interval between probes
    fn set_keepalive_period(&self, period: Duration) -> io::Result<()>;
}

fn keepalive_params(period: Duration) -> TcpKeepalive {
    let params = TcpKeepalive::new().with_time(period);

    #[cfg(any(
        target_os = "android",
        target_os = "dragonfly",
        target_os = "freebsd",
        target_os = "fuchsia",
        target_os = "illumos",
        target_os = "ios",
        target_os = "linux",
        target_os = "macos",
        target_os = "netbsd",
    ))]
    let params = params.with_interval(period);

    params
}

impl RawTransport for SockRef<'_> {
    fn set_user_timeout(&self, timeout: Duration) -> io::Result<()> {
        set_user_timeout(self, timeout)
    }

    fn set_keepalive(&self, enabled: bool) -> io::Result<()> {
        Socket::set_keepalive(self, enabled)
    }

    fn set_keepalive_period(&self, period: Duration) -> io::Result<()> {
        self.set_tcp_keepalive(&keepalive_params(period))
    }
}

impl RawTransport for TcpStream {
    fn set_user_timeout(&self, timeout: Duration) -> io::Result<()> {
        RawTransport::set_user_timeout(&SockRef::from(self), timeout)
    }

    fn set_keepalive(&self, enabled: bool) -> io::Result<()> {
        RawTransport::set_keepalive(&SockRef::from(self), enabled)
    }

    fn set_keepalive_period(&self, period: Duration) -> io::Result<()> {
        RawTransport::set_keepalive_period(&SockRef::from(self), period)
    }
}

impl RawTransport for Socket {
    fn set_user_timeout(&self, timeout: Duration) -> io::Result<()> {
        RawTransport::set_user_timeout(&SockRef::from(self), timeout)
    }

    fn set_keepalive(&self, enabled: bool) -> io::Result<()> {
        Socket::set_keepalive(self, enabled)
    }

    fn set_keepalive_period(&self, period: Duration) -> io::Result<()> {
        self.set_tcp_keepalive(&keepalive_params(period))
    }
}

fn step(option: SocketOption, result: io::Result<()>) -> Result<()> {
    result.map_err(|source| {
        log::warn!("Failed to set {} on connection: {}", option, source);
        Error::SocketOption { option, source }
    })
}

/// Apply the dead-peer timeouts to a transport
///
/// In order: `TCP_USER_TIMEOUT` of [`USER_TIMEOUT`], keepalive on, keepalive
/// period of [`KEEPALIVE_PERIOD`]. The first failure is returned and the
/// remaining steps are skipped. Steps already applied are left in place, as
/// the OS defaults they replaced are only slower, not unsafe.
///
/// The user timeout matters because keepalive alone does not fire while
/// unacknowledged data is queued; retransmission backoff takes over and can
/// hold the connection open for around twenty minutes. See
/// <https://git.kernel.org/pub/scm/linux/kernel/git/torvalds/linux.git/commit/?id=dca43c75e7e545694a9dd6288553f55c53e2a3a3>
pub fn apply_timeouts<T: RawTransport + ?Sized>(transport: &T) -> Result<()> {
    step(SocketOption::UserTimeout, transport.set_user_timeout(USER_TIMEOUT))?;
    step(SocketOption::KeepAlive, transport.set_keepalive(true))?;
    step(SocketOption::KeepAlivePeriod, transport.set_keepalive_period(KEEPALIVE_PERIOD))?;

    Ok(())
}

/// Timeout-related socket options as currently set on a socket
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeoutSnapshot {
    pub keepalive: bool,
    pub keepalive_time: Duration,
    /// `None` where the platform does not expose the probe interval
    pub keepalive_interval: Option<Duration>,
    /// `None` where the platform has no `TCP_USER_TIMEOUT`, or it is unset
    pub user_timeout: Option<Duration>,
}

impl TimeoutSnapshot {
    /// Read the options back from the kernel
    pub fn read(stream: &TcpStream) -> io::Result<Self> {
        let socket = SockRef::from(stream);

        #[cfg(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
        ))]
        let keepalive_interval = Some(socket.keepalive_interval()?);
        #[cfg(not(any(
            target_os = "android",
            target_os = "dragonfly",
            target_os = "freebsd",
            target_os = "fuchsia",
            target_os = "illumos",
            target_os = "ios",
            target_os = "linux",
            target_os = "macos",
            target_os = "netbsd",
        )))]
        let keepalive_interval = None;

        #[cfg(any(target_os = "android", target_os = "fuchsia", target_os = "linux"))]
        let user_timeout = socket.tcp_user_timeout()?;
        #[cfg(not(any(target_os = "android", target_os = "fuchsia", target_os = "linux")))]
        let user_timeout = None;

        Ok(TimeoutSnapshot {
            keepalive: socket.keepalive()?,
            keepalive_time: socket.keepalive_time()?,
            keepalive_interval,
            user_timeout,
        })
    }
}
