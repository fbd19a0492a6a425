//! Outbound connection establishment
//!
//! The single outbound path is a direct TCP dial with the socket bound to
//! a tunnel's kernel interface. Domain targets are resolved over a bound
//! UDP socket first, so the lookup cannot leak outside the tunnel.

mod dialer;
mod resolver;

pub use dialer::{dial_through_interface, has_net_admin_capability, is_root};
pub use resolver::resolve_on_interface;

use std::time::Duration;

/// Dial timeout for outbound CONNECT targets
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);
