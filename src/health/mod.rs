//! Tunnel health probing
//!
//! A single periodic prober issues per-tunnel HTTPS probes bound to each
//! tunnel's interface and applies the hysteresis state machine on the
//! results.

mod probe;
mod prober;

pub use probe::{
    probe_interface, probe_tls_connector, PROBE_ADDR, PROBE_DEADLINE, PROBE_DIAL_TIMEOUT,
    PROBE_HOST, PROBE_PATH,
};
pub use prober::HealthProber;
