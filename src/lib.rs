//! wg-balancer: SOCKS5 gateway over a pool of WireGuard tunnels
//!
//! wg-balancer multiplexes outbound TCP traffic across a configured set of
//! WireGuard tunnels on a Linux host. Each tunnel is a kernel network
//! interface; outbound sockets are pinned to an interface with
//! `SO_BINDTODEVICE`, so traffic egresses through a specific tunnel
//! regardless of the host routing table. No routes are installed for the
//! tunnels at all.
//!
//! # Architecture
//!
//! ```text
//! Client ── SOCKS5 ──> listener base_port      ──> any healthy tunnel
//!                      listener base_port+1+i  ──> tunnel i only
//!                              │
//!                      selection pool (health-gated)
//!                              │
//!                      bound dial ──> relay ──> Internet via wgX
//! ```
//!
//! A periodic prober issues an HTTPS request per tunnel, bound to that
//! tunnel's interface, and drives the health state machine: one success
//! marks a tunnel healthy, `failure_threshold` consecutive failures mark
//! it unhealthy.
//!
//! # Modules
//!
//! - [`config`]: YAML configuration types and loading
//! - [`error`]: error types
//! - [`tunnel`]: tunnel model, wg-quick splitting, provisioning, selection
//! - [`health`]: periodic interface-bound health probes
//! - [`outbound`]: interface-bound TCP dialer
//! - [`io`]: relay buffer pool and bidirectional copy
//! - [`proxy`]: SOCKS5 listeners and connection handling
//! - [`stats`]: per-tunnel statistics for the external dashboard

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod health;
pub mod io;
pub mod outbound;
pub mod proxy;
pub mod stats;
pub mod tunnel;

// Re-export commonly used types at the crate root
pub use config::{Config, ProxyConfig, TunnelConfig, WireGuardConfig};
pub use error::{
    ConfigError, DialError, ProbeError, ProxyError, Result, TunnelError, WgBalancerError,
};
pub use health::HealthProber;
pub use io::RelayBufferPool;
pub use proxy::ProxyServer;
pub use stats::StatsTracker;
pub use tunnel::{Tunnel, TunnelManager};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
