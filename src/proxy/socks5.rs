//! SOCKS5 wire protocol (RFC 1928, CONNECT subset)
//!
//! Only the no-authentication method and the CONNECT command are
//! supported. A framing violation ends the connection without a reply:
//! once the stream deviates from the protocol there is no well-defined
//! state to answer from.

use std::net::Ipv6Addr;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProxyError;

/// SOCKS protocol version
pub const SOCKS5_VERSION: u8 = 0x05;
/// "No authentication required" method
pub const AUTH_METHOD_NONE: u8 = 0x00;
/// CONNECT command
pub const CMD_CONNECT: u8 = 0x01;
/// IPv4 address type
pub const ATYP_IPV4: u8 = 0x01;
/// Domain name address type
pub const ATYP_DOMAIN: u8 = 0x03;
/// IPv6 address type
pub const ATYP_IPV6: u8 = 0x04;
/// Reply: succeeded
pub const REPLY_SUCCEEDED: u8 = 0x00;
/// Reply: general SOCKS server failure
pub const REPLY_GENERAL_FAILURE: u8 = 0x01;

/// Run the method negotiation and read the CONNECT target.
///
/// Returns the canonical `host:port` target string. Domain names are
/// preserved verbatim (resolution happens later, on the socket already
/// bound to the selected tunnel); IPv6 literals are bracketed so the
/// target can be fed to a resolver directly.
///
/// # Errors
///
/// Returns `ProxyError::Protocol` on any framing violation; the caller
/// closes the connection without replying.
pub async fn socks5_handshake<S>(stream: &mut S) -> Result<String, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    negotiate_method(stream).await?;
    read_connect_target(stream).await
}

/// Greeting phase: `VER NMETHODS METHODS...` answered with no-auth
async fn negotiate_method<S>(stream: &mut S) -> Result<(), ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 2];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| ProxyError::protocol(format!("read greeting: {e}")))?;

    if header[0] != SOCKS5_VERSION {
        return Err(ProxyError::protocol(format!(
            "unsupported SOCKS version: {}",
            header[0]
        )));
    }

    let nmethods = header[1] as usize;
    if nmethods == 0 {
        return Err(ProxyError::protocol("no authentication methods offered"));
    }

    let mut methods = [0u8; 255];
    stream
        .read_exact(&mut methods[..nmethods])
        .await
        .map_err(|e| ProxyError::protocol(format!("read methods: {e}")))?;

    stream
        .write_all(&[SOCKS5_VERSION, AUTH_METHOD_NONE])
        .await
        .map_err(|e| ProxyError::protocol(format!("write method reply: {e}")))?;

    Ok(())
}

/// Request phase: `VER CMD RSV ATYP DST.ADDR DST.PORT`
async fn read_connect_target<S>(stream: &mut S) -> Result<String, ProxyError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut header = [0u8; 4];
    stream
        .read_exact(&mut header)
        .await
        .map_err(|e| ProxyError::protocol(format!("read request header: {e}")))?;

    if header[0] != SOCKS5_VERSION {
        return Err(ProxyError::protocol(format!(
            "invalid version in request: {}",
            header[0]
        )));
    }

    if header[1] != CMD_CONNECT {
        return Err(ProxyError::protocol(format!(
            "unsupported command: {}",
            header[1]
        )));
    }

    let host = match header[3] {
        ATYP_IPV4 => {
            let mut octets = [0u8; 4];
            stream
                .read_exact(&mut octets)
                .await
                .map_err(|e| ProxyError::protocol(format!("read IPv4 address: {e}")))?;
            std::net::Ipv4Addr::from(octets).to_string()
        }
        ATYP_DOMAIN => {
            let mut len = [0u8; 1];
            stream
                .read_exact(&mut len)
                .await
                .map_err(|e| ProxyError::protocol(format!("read domain length: {e}")))?;
            let mut domain = vec![0u8; len[0] as usize];
            stream
                .read_exact(&mut domain)
                .await
                .map_err(|e| ProxyError::protocol(format!("read domain: {e}")))?;
            String::from_utf8_lossy(&domain).into_owned()
        }
        ATYP_IPV6 => {
            let mut octets = [0u8; 16];
            stream
                .read_exact(&mut octets)
                .await
                .map_err(|e| ProxyError::protocol(format!("read IPv6 address: {e}")))?;
            format!("[{}]", Ipv6Addr::from(octets))
        }
        atyp => {
            return Err(ProxyError::protocol(format!(
                "unsupported address type: {atyp}"
            )));
        }
    };

    let mut port = [0u8; 2];
    stream
        .read_exact(&mut port)
        .await
        .map_err(|e| ProxyError::protocol(format!("read port: {e}")))?;
    let port = u16::from_be_bytes(port);

    Ok(format!("{host}:{port}"))
}

/// Send a CONNECT reply. The bound address is always `0.0.0.0:0`; clients
/// that depend on a meaningful bound address are out of scope.
pub async fn send_reply<S>(stream: &mut S, reply: u8) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let response = [
        SOCKS5_VERSION,
        reply,
        0x00, // RSV
        ATYP_IPV4,
        0, 0, 0, 0, // BND.ADDR
        0, 0, // BND.PORT
    ];
    stream.write_all(&response).await
}
