//! Interface-bound name resolution
//!
//! Domain CONNECT targets are resolved here, over a UDP socket that is
//! bound to the selected tunnel's interface before the query leaves the
//! host. The system resolver cannot be used for this: its sockets cannot
//! be device-bound, so the lookup would egress over the default route and
//! leak outside the tunnel.
//!
//! Queries go to the nameservers from `/etc/resolv.conf` (public
//! resolvers as a fallback), A records first, then AAAA.

use std::net::{IpAddr, SocketAddr};
use std::os::unix::io::AsRawFd;
use std::time::Duration;

use hickory_proto::op::{Message, MessageType, OpCode, Query};
use hickory_proto::rr::{Name, RData, RecordType};
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

use crate::error::DialError;

/// Nameserver UDP port
const DNS_PORT: u16 = 53;

/// Where the system nameserver list lives
const RESOLV_CONF_PATH: &str = "/etc/resolv.conf";

/// Nameservers used when `/etc/resolv.conf` yields none
const FALLBACK_NAMESERVERS: &[IpAddr] = &[
    IpAddr::V4(std::net::Ipv4Addr::new(1, 1, 1, 1)),
    IpAddr::V4(std::net::Ipv4Addr::new(1, 0, 0, 1)),
];

/// Per-query response deadline; the dial timeout still bounds the whole
/// resolution
const QUERY_TIMEOUT: Duration = Duration::from_secs(3);

/// Maximum UDP response size (EDNS0 responses exceed the classic 512)
const UDP_RECV_BUFFER_SIZE: usize = 4096;

/// At most this many nameservers are tried, like libc MAXNS
const MAX_NAMESERVERS: usize = 3;

/// Split a `host:port` target into its parts. IPv6 literals arrive
/// bracketed (`[::1]:443`).
pub(super) fn parse_target(target: &str) -> Result<(String, u16), DialError> {
    let (host, port) = if let Some(rest) = target.strip_prefix('[') {
        let (host, port) = rest
            .split_once("]:")
            .ok_or_else(|| DialError::resolve(target, "malformed IPv6 target"))?;
        (host.to_string(), port)
    } else {
        let (host, port) = target
            .rsplit_once(':')
            .ok_or_else(|| DialError::resolve(target, "missing port"))?;
        (host.to_string(), port)
    };

    let port = port
        .parse()
        .map_err(|_| DialError::resolve(target, format!("invalid port: {port}")))?;

    Ok((host, port))
}

/// Resolve `host` to socket addresses with every lookup packet leaving
/// through `interface`.
///
/// IP literals short-circuit without touching the network. Domain names
/// are queried against each configured nameserver in turn; the first
/// nameserver that returns any address wins.
///
/// # Errors
///
/// Returns `DialError::Resolve` when the name is invalid or no
/// nameserver produced an address.
pub async fn resolve_on_interface(
    interface: &str,
    host: &str,
    port: u16,
) -> Result<Vec<SocketAddr>, DialError> {
    // Literal addresses need no lookup
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(vec![SocketAddr::new(ip, port)]);
    }

    let name = Name::from_utf8(host)
        .map_err(|e| DialError::resolve(host, format!("invalid domain name: {e}")))?;

    let mut last_error = None;
    for nameserver in nameservers() {
        let mut addrs = Vec::new();
        for record_type in [RecordType::A, RecordType::AAAA] {
            match query_nameserver(interface, nameserver, &name, record_type).await {
                Ok(found) => addrs.extend(found),
                Err(e) => {
                    debug!(
                        host,
                        nameserver = %nameserver,
                        record_type = %record_type,
                        error = %e,
                        "DNS query failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        if !addrs.is_empty() {
            debug!(host, nameserver = %nameserver, count = addrs.len(), "Resolved on bound socket");
            return Ok(addrs.into_iter().map(|ip| SocketAddr::new(ip, port)).collect());
        }
    }

    Err(last_error
        .unwrap_or_else(|| DialError::resolve(host, "no nameserver returned an address")))
}

/// Nameservers from `/etc/resolv.conf`, falling back to public resolvers
fn nameservers() -> Vec<IpAddr> {
    let parsed = std::fs::read_to_string(RESOLV_CONF_PATH)
        .map(|contents| parse_nameservers(&contents))
        .unwrap_or_default();

    if parsed.is_empty() {
        FALLBACK_NAMESERVERS.to_vec()
    } else {
        parsed
    }
}

/// Extract `nameserver` entries from resolv.conf contents
fn parse_nameservers(contents: &str) -> Vec<IpAddr> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let value = line.strip_prefix("nameserver")?;
            value.trim().parse().ok()
        })
        .take(MAX_NAMESERVERS)
        .collect()
}

/// Send one query to one nameserver over a bound socket and collect the
/// answer addresses
async fn query_nameserver(
    interface: &str,
    nameserver: IpAddr,
    name: &Name,
    record_type: RecordType,
) -> Result<Vec<IpAddr>, DialError> {
    let ns_addr = SocketAddr::new(nameserver, DNS_PORT);
    let socket = bound_udp_socket(interface, ns_addr)?;

    let query_id: u16 = rand::random();
    let request = build_query(query_id, name.clone(), record_type)
        .map_err(|e| DialError::resolve(name.to_utf8(), e))?;

    socket
        .send(&request)
        .await
        .map_err(|e| DialError::resolve(name.to_utf8(), format!("send to {ns_addr}: {e}")))?;

    let mut buf = [0u8; UDP_RECV_BUFFER_SIZE];
    let n = match timeout(QUERY_TIMEOUT, socket.recv(&mut buf)).await {
        Ok(Ok(n)) => n,
        Ok(Err(e)) => {
            return Err(DialError::resolve(
                name.to_utf8(),
                format!("recv from {ns_addr}: {e}"),
            ));
        }
        Err(_) => {
            return Err(DialError::resolve(
                name.to_utf8(),
                format!("{ns_addr} did not answer within {}s", QUERY_TIMEOUT.as_secs()),
            ));
        }
    };

    let response = Message::from_bytes(&buf[..n])
        .map_err(|e| DialError::resolve(name.to_utf8(), format!("malformed response: {e}")))?;

    if response.id() != query_id {
        return Err(DialError::resolve(
            name.to_utf8(),
            "response id does not match query",
        ));
    }

    Ok(extract_addrs(&response))
}

/// Create a UDP socket bound to `interface` and connected to the
/// nameserver
fn bound_udp_socket(interface: &str, ns_addr: SocketAddr) -> Result<UdpSocket, DialError> {
    let domain = if ns_addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))
        .map_err(|e| DialError::socket_option("create", e.to_string()))?;

    super::dialer::bind_socket_to_device(socket.as_raw_fd(), interface)?;

    socket
        .set_nonblocking(true)
        .map_err(|e| DialError::socket_option("O_NONBLOCK", e.to_string()))?;

    socket
        .connect(&ns_addr.into())
        .map_err(|e| DialError::resolve(ns_addr.to_string(), e.to_string()))?;

    let std_socket: std::net::UdpSocket = socket.into();
    UdpSocket::from_std(std_socket)
        .map_err(|e| DialError::socket_option("register", e.to_string()))
}

/// Build a recursion-desired query for `name`
fn build_query(id: u16, name: Name, record_type: RecordType) -> Result<Vec<u8>, String> {
    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .add_query(Query::query(name, record_type));

    message.to_bytes().map_err(|e| e.to_string())
}

/// Pull A and AAAA answers out of a response
fn extract_addrs(response: &Message) -> Vec<IpAddr> {
    response
        .answers()
        .iter()
        .filter_map(|record| match record.data() {
            Some(RData::A(a)) => Some(IpAddr::V4(a.0)),
            Some(RData::AAAA(aaaa)) => Some(IpAddr::V6(aaaa.0)),
            _ => None,
        })
        .collect()
}
