//! SOCKS5 listener and connection handling
//!
//! One `ProxyServer` runs per listener port. Listener index 0 picks any
//! healthy tunnel per connection; index `k > 0` pins every connection to
//! tunnel `k - 1`. Each accepted connection is handled on its own task:
//! handshake under the read deadline, tunnel selection, interface-bound
//! dial, reply, then the relay with no further deadline.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info};

use super::socks5::{send_reply, socks5_handshake, REPLY_GENERAL_FAILURE, REPLY_SUCCEEDED};
use crate::error::ProxyError;
use crate::io::{relay, RelayBufferPool};
use crate::outbound::{dial_through_interface, DIAL_TIMEOUT};
use crate::stats::StatsTracker;
use crate::tunnel::TunnelManager;

/// Shared context for every connection handler
struct HandlerContext {
    manager: Arc<TunnelManager>,
    stats: Arc<StatsTracker>,
    buffer_pool: Arc<RelayBufferPool>,
    read_timeout: Duration,
}

/// A single SOCKS5 listener bound to one port
pub struct ProxyServer {
    listener: TcpListener,
    /// 0 selects any healthy tunnel; `k > 0` pins to tunnel `k - 1`
    listener_index: usize,
    context: Arc<HandlerContext>,
}

impl ProxyServer {
    /// Bind the listener. Bind failure is startup-fatal for the process.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::BindError` when the port cannot be bound.
    pub async fn bind(
        listener_index: usize,
        port: u16,
        manager: Arc<TunnelManager>,
        stats: Arc<StatsTracker>,
        buffer_pool: Arc<RelayBufferPool>,
        read_timeout: Duration,
    ) -> Result<Self, ProxyError> {
        let addr = format!("0.0.0.0:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::bind(&addr, e.to_string()))?;

        info!(addr = %addr, index = listener_index, "SOCKS5 proxy listening");

        Ok(Self {
            listener,
            listener_index,
            context: Arc::new(HandlerContext {
                manager,
                stats,
                buffer_pool,
                read_timeout,
            }),
        })
    }

    /// Accept connections until the shutdown signal fires, then drain
    /// in-flight handlers.
    ///
    /// Accept errors are logged and the loop continues. The drain itself
    /// is unbounded here; the orchestrator wraps all servers in one
    /// shared shutdown timeout.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut handlers = JoinSet::new();

        loop {
            tokio::select! {
                result = self.listener.accept() => {
                    match result {
                        Ok((stream, peer_addr)) => {
                            debug!(peer = %peer_addr, index = self.listener_index, "Connection accepted");
                            let context = Arc::clone(&self.context);
                            let listener_index = self.listener_index;
                            handlers.spawn(async move {
                                handle_connection(stream, peer_addr, listener_index, context).await;
                            });
                        }
                        Err(e) => {
                            error!(index = self.listener_index, error = %e, "Accept error");
                        }
                    }
                }
                // Reap finished handlers so the set does not grow unbounded
                Some(_) = handlers.join_next(), if !handlers.is_empty() => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        // Stop accepting before draining
        drop(self.listener);
        info!(index = self.listener_index, "SOCKS5 proxy shutting down");

        while handlers.join_next().await.is_some() {}
    }
}

/// Handle one client connection through its full lifecycle
async fn handle_connection(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    listener_index: usize,
    context: Arc<HandlerContext>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer_addr, error = %e, "Failed to set TCP_NODELAY");
    }

    // The read deadline covers only the handshake; the relay phase runs
    // without an application-level timeout
    let target = match timeout(context.read_timeout, socks5_handshake(&mut stream)).await {
        Ok(Ok(target)) => target,
        Ok(Err(e)) => {
            // Framing violation: close silently, no reply
            debug!(peer = %peer_addr, error = %e, "SOCKS5 handshake failed");
            return;
        }
        Err(_) => {
            debug!(peer = %peer_addr, "SOCKS5 handshake timed out");
            return;
        }
    };

    let selection = if listener_index == 0 {
        context.manager.get_any()
    } else {
        context.manager.get(listener_index - 1)
    };

    let tunnel = match selection {
        Ok(tunnel) => tunnel,
        Err(e) => {
            debug!(peer = %peer_addr, target = %target, error = %e, "No healthy connection available");
            let _ = send_reply(&mut stream, REPLY_GENERAL_FAILURE).await;
            return;
        }
    };

    let target_stream =
        match dial_through_interface(&tunnel.interface_name, &target, DIAL_TIMEOUT).await {
            Ok(stream) => stream,
            Err(e) => {
                debug!(
                    peer = %peer_addr,
                    target = %target,
                    tunnel = %tunnel.name,
                    error = %e,
                    "Failed to connect to target"
                );
                let _ = send_reply(&mut stream, REPLY_GENERAL_FAILURE).await;
                return;
            }
        };

    if let Err(e) = send_reply(&mut stream, REPLY_SUCCEEDED).await {
        debug!(peer = %peer_addr, error = %e, "Failed to send connect reply");
        return;
    }

    context.stats.increment_requests(tunnel.index);

    let (sent, received) = relay(stream, target_stream, &context.buffer_pool).await;

    debug!(
        peer = %peer_addr,
        target = %target,
        tunnel = %tunnel.name,
        sent,
        received,
        "Connection completed"
    );
}
