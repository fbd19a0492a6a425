//! Single tunnel connectivity probe
//!
//! The probe fetches `https://cloudflare.com/cdn-cgi/trace` with the TCP
//! socket bound to the tunnel's interface. The dial goes to the IP literal
//! `1.1.1.1:443` while SNI and the `Host` header carry the hostname, so no
//! DNS lookup happens; a lookup could resolve over the wrong tunnel and
//! falsify the result.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tokio_rustls::TlsConnector;

use crate::error::ProbeError;
use crate::outbound::dial_through_interface;

/// Probe target address (dialed directly, no DNS)
pub const PROBE_ADDR: &str = "1.1.1.1:443";

/// Hostname carried in SNI and the `Host` header
pub const PROBE_HOST: &str = "cloudflare.com";

/// Request path on the probe target
pub const PROBE_PATH: &str = "/cdn-cgi/trace";

/// Timeout for the TCP dial alone
pub const PROBE_DIAL_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadline for the whole probe (dial + TLS + request + status line)
pub const PROBE_DEADLINE: Duration = Duration::from_secs(10);

/// Build the TLS connector shared by all probes
#[must_use]
pub fn probe_tls_connector() -> TlsConnector {
    let root_store = RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let config = ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth();
    TlsConnector::from(Arc::new(config))
}

/// Probe connectivity through `interface`.
///
/// Success is exactly an HTTP 200 status line; the body is not read.
/// Returns the elapsed wall time from dial start to the parsed status.
///
/// # Errors
///
/// Returns `ProbeError` on dial, TLS, or HTTP failure, or when the
/// overall deadline expires.
pub async fn probe_interface(
    interface: &str,
    connector: &TlsConnector,
) -> Result<Duration, ProbeError> {
    let start = Instant::now();

    let attempt = async {
        let tcp = dial_through_interface(interface, PROBE_ADDR, PROBE_DIAL_TIMEOUT).await?;

        let server_name: ServerName<'static> = PROBE_HOST
            .to_string()
            .try_into()
            .map_err(|_| ProbeError::Tls(format!("invalid server name: {PROBE_HOST}")))?;

        let mut tls = connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| ProbeError::Tls(e.to_string()))?;

        let request = format!(
            "GET {PROBE_PATH} HTTP/1.1\r\nHost: {PROBE_HOST}\r\nConnection: close\r\n\r\n"
        );
        tls.write_all(request.as_bytes()).await?;

        let status = read_status_code(&mut tls).await?;
        if status != 200 {
            return Err(ProbeError::UnexpectedStatus { status });
        }

        Ok(())
    };

    match timeout(PROBE_DEADLINE, attempt).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(ProbeError::Timeout {
            deadline_secs: PROBE_DEADLINE.as_secs(),
        }),
    }
}

/// Read the HTTP status line and extract the status code
async fn read_status_code<S>(stream: &mut S) -> Result<u16, ProbeError>
where
    S: AsyncReadExt + Unpin,
{
    let mut buf = Vec::with_capacity(128);
    let mut byte = [0u8; 1];

    // The status line is tiny; read byte-wise until CRLF
    loop {
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(ProbeError::BadResponse("connection closed mid-status".into()));
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
        if buf.len() > 256 {
            return Err(ProbeError::BadResponse("status line too long".into()));
        }
    }

    parse_status_line(&String::from_utf8_lossy(&buf))
}

/// Parse `HTTP/1.1 200 OK` into `200`
fn parse_status_line(line: &str) -> Result<u16, ProbeError> {
    let line = line.trim_end_matches('\r');
    if !line.starts_with("HTTP/") {
        return Err(ProbeError::BadResponse(format!("not an HTTP status line: {line}")));
    }

    line.split_whitespace()
        .nth(1)
        .and_then(|code| code.parse().ok())
        .ok_or_else(|| ProbeError::BadResponse(format!("missing status code: {line}")))
}
