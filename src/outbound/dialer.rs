//! Interface-bound TCP dialer
//!
//! Opens outbound connections with the socket pinned to a named kernel
//! device via `SO_BINDTODEVICE` before `connect`. With the socket bound,
//! traffic egresses through the chosen WireGuard interface regardless of
//! the host routing table. Domain targets are resolved over a bound
//! socket as well (see the resolver), so DNS egress also uses the chosen
//! tunnel. Setting the option requires `CAP_NET_ADMIN`.

use std::io;
use std::net::SocketAddr;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use super::resolver::{parse_target, resolve_on_interface};
use crate::error::DialError;

/// Maximum interface name length accepted by `SO_BINDTODEVICE`
/// (IFNAMSIZ including the NUL terminator)
const IFNAMSIZ: usize = 16;

/// Set `SO_BINDTODEVICE` on a raw fd; shared by the TCP dialer and the
/// bound DNS resolver
pub(super) fn bind_socket_to_device(fd: RawFd, interface: &str) -> Result<(), DialError> {
    if interface.len() >= IFNAMSIZ {
        return Err(DialError::socket_option(
            "SO_BINDTODEVICE",
            format!("Interface name too long: {interface} (max 15 chars)"),
        ));
    }

    // Null-terminated interface name
    let mut ifname = [0u8; IFNAMSIZ];
    ifname[..interface.len()].copy_from_slice(interface.as_bytes());

    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            ifname.as_ptr().cast::<libc::c_void>(),
            ifname.len() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        return Err(DialError::socket_option(
            "SO_BINDTODEVICE",
            format!("Failed to bind to interface {interface}: {err}"),
        ));
    }

    debug!(interface, "Bound socket to interface");
    Ok(())
}

/// Connect to one resolved address with the socket bound to `interface`
async fn connect_addr(addr: SocketAddr, interface: &str) -> Result<TcpStream, DialError> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| DialError::connection_failed(addr.to_string(), e.to_string()))?;

    bind_socket_to_device(socket.as_raw_fd(), interface)?;

    socket
        .set_nonblocking(true)
        .map_err(|e| DialError::socket_option("O_NONBLOCK", e.to_string()))?;

    // Initiate the non-blocking connect; EINPROGRESS is the expected path
    match socket.connect(&addr.into()) {
        Ok(()) => {}
        Err(ref e) if e.raw_os_error() == Some(libc::EINPROGRESS) => {}
        Err(e) => return Err(DialError::connection_failed(addr.to_string(), e.to_string())),
    }

    // Hand the fd to tokio so it is closed on drop from here on
    let std_stream: std::net::TcpStream = socket.into();
    let stream = TcpStream::from_std(std_stream)
        .map_err(|e| DialError::connection_failed(addr.to_string(), e.to_string()))?;

    // Wait for the connect to complete, then check SO_ERROR
    stream
        .writable()
        .await
        .map_err(|e| DialError::connection_failed(addr.to_string(), e.to_string()))?;

    match stream.take_error() {
        Ok(None) => {}
        Ok(Some(e)) => return Err(DialError::connection_failed(addr.to_string(), e.to_string())),
        Err(e) => return Err(DialError::connection_failed(addr.to_string(), e.to_string())),
    }

    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    Ok(stream)
}

/// Open a TCP connection to `target` (`host:port`) through `interface`.
///
/// Name resolution happens here, at dial time and on a socket bound to
/// `interface`, so a domain target is only resolved once a tunnel has
/// been selected and the lookup itself egresses through that tunnel. The
/// deadline covers resolution and all connect attempts.
///
/// # Errors
///
/// Returns `DialError` if resolution fails, no address accepts the
/// connection, or the deadline expires.
pub async fn dial_through_interface(
    interface: &str,
    target: &str,
    dial_timeout: Duration,
) -> Result<TcpStream, DialError> {
    let attempt = async {
        let (host, port) = parse_target(target)?;
        let addrs = resolve_on_interface(interface, &host, port).await?;

        let mut last_error = None;
        for addr in addrs {
            match connect_addr(addr, interface).await {
                Ok(stream) => {
                    debug!(target, %addr, interface, "Outbound connection established");
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }

        Err(last_error
            .unwrap_or_else(|| DialError::connection_failed(target, "no address succeeded")))
    };

    match timeout(dial_timeout, attempt).await {
        Ok(result) => result,
        Err(_) => Err(DialError::Timeout {
            target: target.to_string(),
            timeout_secs: dial_timeout.as_secs(),
        }),
    }
}

/// Check if running as root (effective UID = 0)
#[must_use]
pub fn is_root() -> bool {
    unsafe { libc::geteuid() == 0 }
}

/// Probe for the `CAP_NET_ADMIN` capability by attempting to bind a
/// throwaway socket to the loopback device. `EPERM` means the capability
/// is missing; any other outcome is treated as present.
#[must_use]
pub fn has_net_admin_capability() -> bool {
    let socket = match Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)) {
        Ok(s) => s,
        Err(_) => return true,
    };

    let mut ifname = [0u8; IFNAMSIZ];
    ifname[..2].copy_from_slice(b"lo");

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_BINDTODEVICE,
            ifname.as_ptr().cast::<libc::c_void>(),
            ifname.len() as libc::socklen_t,
        )
    };

    ret == 0 || io::Error::last_os_error().raw_os_error() != Some(libc::EPERM)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interface_name_length_guard() {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP)).unwrap();
        let err = bind_socket_to_device(socket.as_raw_fd(), "an-interface-name-that-is-too-long")
            .unwrap_err();
        assert!(matches!(err, DialError::SocketOption { .. }));
    }

    #[test]
    fn test_is_root_does_not_crash() {
        let _ = is_root();
    }

    #[test]
    fn test_capability_probe_does_not_crash() {
        let _ = has_net_admin_capability();
    }

    #[tokio::test]
    async fn test_dial_times_out() {
        // 203.0.113.0/24 is TEST-NET-3; nothing should answer. Without
        // privileges the bind itself may fail first, which is also an error.
        let result = dial_through_interface(
            "lo",
            "203.0.113.1:9",
            Duration::from_millis(200),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_dial_resolve_failure() {
        let result = dial_through_interface(
            "lo",
            "host.invalid:80",
            Duration::from_secs(2),
        )
        .await;
        assert!(result.is_err());
    }
}
