//! Tunnel model with lock-free health state
//!
//! A `Tunnel` pairs an immutable identity (index, name, kernel interface,
//! config path) with mutable health state held in atomics. The health
//! prober is the only writer; the selection pool and stats readers load
//! the fields without taking any lock.
//!
//! # Hysteresis
//!
//! A single probe success marks the tunnel healthy and resets the failure
//! counter. Only `failure_threshold` consecutive failures mark it
//! unhealthy, so transient packet loss does not cause flapping.
//!
//! ```text
//! Unhealthy ──[1 success]──> Healthy ──[threshold failures]──> Unhealthy
//! ```

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::TunnelConfig;

/// A WireGuard tunnel: immutable identity plus atomic health state
#[derive(Debug)]
pub struct Tunnel {
    /// Stable index in the tunnel set; listener `base_port + 1 + index`
    /// pins to this tunnel
    pub index: usize,
    /// Display name
    pub name: String,
    /// Kernel interface name
    pub interface_name: String,
    /// Path to the wg-quick config file
    pub config_path: PathBuf,

    /// Whether the most recent probes indicate connectivity
    healthy: AtomicBool,
    /// Consecutive probe failures since the last success
    consecutive_failures: AtomicU32,
    /// Unix timestamp of the last probe attempt (success or failure)
    last_probe_unix: AtomicI64,
}

impl Tunnel {
    /// Create a tunnel from its configuration; initially unhealthy
    pub fn new(index: usize, config: &TunnelConfig) -> Self {
        Self {
            index,
            name: config.name.clone(),
            interface_name: config.interface_name.clone(),
            config_path: PathBuf::from(&config.config_path),
            healthy: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            last_probe_unix: AtomicI64::new(0),
        }
    }

    /// Whether the tunnel is currently eligible for selection
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Relaxed)
    }

    /// Current consecutive failure count
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    /// Unix timestamp of the last probe attempt (0 if never probed)
    #[must_use]
    pub fn last_probe_unix(&self) -> i64 {
        self.last_probe_unix.load(Ordering::Relaxed)
    }

    /// Record a probe success: reset the failure counter and mark healthy.
    ///
    /// Returns `true` iff this flipped the tunnel unhealthy -> healthy.
    pub fn record_success(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        !self.healthy.swap(true, Ordering::Relaxed)
    }

    /// Record a probe failure against the given threshold.
    ///
    /// The counter keeps growing past the threshold until the next success
    /// resets it. Returns `true` iff this flipped the tunnel
    /// healthy -> unhealthy.
    pub fn record_failure(&self, failure_threshold: u32) -> bool {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= failure_threshold {
            self.healthy.swap(false, Ordering::Relaxed)
        } else {
            false
        }
    }

    /// Stamp the last-probe time; called after every probe attempt
    pub fn touch_probe_time(&self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        self.last_probe_unix.store(now, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel() -> Tunnel {
        Tunnel::new(
            0,
            &TunnelConfig {
                name: "test".into(),
                interface_name: "wg-test".into(),
                config_path: "/etc/wireguard/test.conf".into(),
            },
        )
    }

    #[test]
    fn test_initially_unhealthy() {
        let t = tunnel();
        assert!(!t.is_healthy());
        assert_eq!(t.consecutive_failures(), 0);
        assert_eq!(t.last_probe_unix(), 0);
    }

    #[test]
    fn test_success_marks_healthy_once() {
        let t = tunnel();
        assert!(t.record_success(), "first success should be a transition");
        assert!(t.is_healthy());
        assert!(!t.record_success(), "repeat success is not a transition");
    }

    #[test]
    fn test_failure_threshold_flips_exactly_once() {
        let t = tunnel();
        t.record_success();

        assert!(!t.record_failure(3));
        assert!(t.is_healthy());
        assert!(!t.record_failure(3));
        assert!(t.is_healthy());

        // Third failure reaches the threshold and transitions
        assert!(t.record_failure(3));
        assert!(!t.is_healthy());

        // Further failures keep counting but do not transition again
        assert!(!t.record_failure(3));
        assert_eq!(t.consecutive_failures(), 4);
    }

    #[test]
    fn test_success_resets_counter_and_recovers() {
        let t = tunnel();
        t.record_success();
        t.record_failure(3);
        t.record_failure(3);
        t.record_failure(3);
        assert!(!t.is_healthy());

        // Single success recovers
        assert!(t.record_success());
        assert!(t.is_healthy());
        assert_eq!(t.consecutive_failures(), 0);

        // Threshold applies afresh after recovery
        assert!(!t.record_failure(3));
        assert!(!t.record_failure(3));
        assert!(t.record_failure(3));
    }

    #[test]
    fn test_failures_before_any_success_never_transition() {
        let t = tunnel();
        for _ in 0..10 {
            assert!(!t.record_failure(3), "already-unhealthy tunnel cannot flip");
        }
        assert!(!t.is_healthy());
    }

    #[test]
    fn test_touch_probe_time() {
        let t = tunnel();
        t.touch_probe_time();
        assert!(t.last_probe_unix() > 0);
    }
}
