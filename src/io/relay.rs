//! Bidirectional relay with half-close propagation
//!
//! Two concurrent copy loops pump bytes between the client and target
//! sockets. When one side closes its write direction (read returns EOF),
//! the relay shuts down the opposite write half so the remote application
//! observes FIN; protocols that signal completion by half-closing
//! (close-delimited HTTP/1.1 responses, SMTP) depend on this.
//!
//! No timeout applies here. The handshake deadline ended before the relay
//! started; from now on TCP keepalive and peer closure govern termination.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

use super::buffer_pool::RelayBufferPool;

/// Copy until EOF or error, then half-close the writer. Returns the byte
/// count for this direction.
async fn copy_then_shutdown<R, W>(
    reader: &mut R,
    writer: &mut W,
    pool: &Arc<RelayBufferPool>,
) -> u64
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = pool.get();
    let mut total = 0u64;

    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Err(e) = writer.write_all(&buf[..n]).await {
                    debug!(error = %e, "Relay write error");
                    break;
                }
                total += n as u64;
            }
            Err(e) => {
                debug!(error = %e, "Relay read error");
                break;
            }
        }
    }

    // Propagate FIN; the peer may already be gone
    let _ = writer.shutdown().await;
    total
}

/// Relay bytes between `client` and `target` until both directions finish.
///
/// Each direction borrows one buffer from the pool for its lifetime.
/// Returns `(client_to_target, target_to_client)` byte counts; I/O errors
/// end the affected direction without failing the relay.
pub async fn relay<A, B>(client: A, target: B, pool: &Arc<RelayBufferPool>) -> (u64, u64)
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut target_read, mut target_write) = tokio::io::split(target);

    let client_to_target = copy_then_shutdown(&mut client_read, &mut target_write, pool);
    let target_to_client = copy_then_shutdown(&mut target_read, &mut client_write, pool);

    tokio::join!(client_to_target, target_to_client)
}
