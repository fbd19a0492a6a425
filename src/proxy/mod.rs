//! SOCKS5 front-end
//!
//! RFC 1928 CONNECT subset, no-auth only. The front-end parses the
//! request, asks the selection pool for a tunnel, dials the target bound
//! to that tunnel's interface, and hands both sockets to the relay.

mod server;
mod socks5;

pub use server::ProxyServer;
pub use socks5::{
    send_reply, socks5_handshake, ATYP_DOMAIN, ATYP_IPV4, ATYP_IPV6, AUTH_METHOD_NONE,
    CMD_CONNECT, REPLY_GENERAL_FAILURE, REPLY_SUCCEEDED, SOCKS5_VERSION,
};
