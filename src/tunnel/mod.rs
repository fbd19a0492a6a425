//! WireGuard tunnel lifecycle, configuration splitting, and selection
//!
//! A tunnel is a WireGuard kernel interface plus atomic health state. The
//! provisioner creates and configures the interface from a wg-quick file;
//! the manager owns the set and exposes the health-gated selection pool.

mod connection;
mod manager;
mod provision;
mod wgconf;

pub use connection::Tunnel;
pub use manager::TunnelManager;
pub use provision::{provision, teardown};
pub use wgconf::{split_config, SplitConfig};
