//! Per-tunnel statistics
//!
//! The tracker is written by the proxy handlers and the health prober and
//! read by the external stats dashboard. All fields are atomics; out-of-
//! range tunnel indices are ignored on write and report zero on read.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Counters for one tunnel
#[derive(Debug, Default)]
struct TunnelCounters {
    request_count: AtomicU64,
    healthy: AtomicBool,
    latency_sum_ns: AtomicU64,
    latency_count: AtomicU64,
    last_check_unix: AtomicI64,
}

/// Process-wide statistics tracker
#[derive(Debug)]
pub struct StatsTracker {
    total_requests: AtomicU64,
    tunnels: Vec<TunnelCounters>,
    start_time: Instant,
}

impl StatsTracker {
    /// Create a tracker for `num_tunnels` tunnels, all initially unhealthy
    #[must_use]
    pub fn new(num_tunnels: usize) -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            tunnels: (0..num_tunnels).map(|_| TunnelCounters::default()).collect(),
            start_time: Instant::now(),
        }
    }

    /// Count a successfully proxied request on `index`
    pub fn increment_requests(&self, index: usize) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if let Some(t) = self.tunnels.get(index) {
            t.request_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a probe latency for `index` (published on success only)
    pub fn record_latency(&self, index: usize, latency: Duration) {
        if let Some(t) = self.tunnels.get(index) {
            t.latency_sum_ns
                .fetch_add(latency.as_nanos() as u64, Ordering::Relaxed);
            t.latency_count.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a health transition for `index`
    pub fn set_health(&self, index: usize, healthy: bool) {
        if let Some(t) = self.tunnels.get(index) {
            t.healthy.store(healthy, Ordering::Relaxed);
            t.last_check_unix.store(unix_now(), Ordering::Relaxed);
        }
    }

    /// Total requests across all tunnels
    #[must_use]
    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    /// Requests proxied through `index`
    #[must_use]
    pub fn connection_requests(&self, index: usize) -> u64 {
        self.tunnels
            .get(index)
            .map_or(0, |t| t.request_count.load(Ordering::Relaxed))
    }

    /// Last recorded health for `index`
    #[must_use]
    pub fn is_connection_healthy(&self, index: usize) -> bool {
        self.tunnels
            .get(index)
            .is_some_and(|t| t.healthy.load(Ordering::Relaxed))
    }

    /// Mean probe latency for `index`; zero when no probe has succeeded
    #[must_use]
    pub fn average_latency(&self, index: usize) -> Duration {
        let Some(t) = self.tunnels.get(index) else {
            return Duration::ZERO;
        };
        let count = t.latency_count.load(Ordering::Relaxed);
        if count == 0 {
            return Duration::ZERO;
        }
        Duration::from_nanos(t.latency_sum_ns.load(Ordering::Relaxed) / count)
    }

    /// Unix timestamp of the last health transition for `index`
    #[must_use]
    pub fn last_check_unix(&self, index: usize) -> i64 {
        self.tunnels
            .get(index)
            .map_or(0, |t| t.last_check_unix.load(Ordering::Relaxed))
    }

    /// Time since tracker creation
    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Number of tracked tunnels
    #[must_use]
    pub fn num_tunnels(&self) -> usize {
        self.tunnels.len()
    }

    /// Snapshot for the stats dashboard; `names` are display names in
    /// index order
    #[must_use]
    pub fn snapshot(&self, names: &[String]) -> StatsSnapshot {
        let uptime = self.uptime();
        StatsSnapshot {
            total_requests: self.total_requests(),
            uptime_seconds: uptime.as_secs(),
            connections: (0..self.tunnels.len())
                .map(|i| TunnelStatsSnapshot {
                    index: i,
                    name: names.get(i).cloned().unwrap_or_default(),
                    healthy: self.is_connection_healthy(i),
                    request_count: self.connection_requests(i),
                    latency_ms: self.average_latency(i).as_secs_f64() * 1000.0,
                    last_check_unix: self.last_check_unix(i),
                })
                .collect(),
        }
    }
}

/// Serializable snapshot of all statistics
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_requests: u64,
    pub uptime_seconds: u64,
    pub connections: Vec<TunnelStatsSnapshot>,
}

/// Serializable snapshot of one tunnel's statistics
#[derive(Debug, Clone, Serialize)]
pub struct TunnelStatsSnapshot {
    pub index: usize,
    pub name: String,
    pub healthy: bool,
    pub request_count: u64,
    pub latency_ms: f64,
    pub last_check_unix: i64,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_counting() {
        let stats = StatsTracker::new(2);
        stats.increment_requests(0);
        stats.increment_requests(0);
        stats.increment_requests(1);

        assert_eq!(stats.total_requests(), 3);
        assert_eq!(stats.connection_requests(0), 2);
        assert_eq!(stats.connection_requests(1), 1);
    }

    #[test]
    fn test_out_of_range_index_ignored() {
        let stats = StatsTracker::new(1);
        stats.increment_requests(5);
        stats.record_latency(5, Duration::from_millis(10));
        stats.set_health(5, true);

        // The total still counts, matching the reference tracker
        assert_eq!(stats.total_requests(), 1);
        assert_eq!(stats.connection_requests(5), 0);
        assert!(!stats.is_connection_healthy(5));
    }

    #[test]
    fn test_average_latency() {
        let stats = StatsTracker::new(1);
        assert_eq!(stats.average_latency(0), Duration::ZERO);

        stats.record_latency(0, Duration::from_millis(10));
        stats.record_latency(0, Duration::from_millis(30));
        assert_eq!(stats.average_latency(0), Duration::from_millis(20));
    }

    #[test]
    fn test_health_stamps_last_check() {
        let stats = StatsTracker::new(1);
        assert!(!stats.is_connection_healthy(0));
        assert_eq!(stats.last_check_unix(0), 0);

        stats.set_health(0, true);
        assert!(stats.is_connection_healthy(0));
        assert!(stats.last_check_unix(0) > 0);

        stats.set_health(0, false);
        assert!(!stats.is_connection_healthy(0));
    }

    #[test]
    fn test_snapshot() {
        let stats = StatsTracker::new(2);
        stats.increment_requests(1);
        stats.set_health(1, true);
        stats.record_latency(1, Duration::from_millis(42));

        let snapshot = stats.snapshot(&["a".into(), "b".into()]);
        assert_eq!(snapshot.total_requests, 1);
        assert_eq!(snapshot.connections.len(), 2);
        assert_eq!(snapshot.connections[1].name, "b");
        assert!(snapshot.connections[1].healthy);
        assert_eq!(snapshot.connections[1].request_count, 1);
        assert!((snapshot.connections[1].latency_ms - 42.0).abs() < 0.1);
        assert!(!snapshot.connections[0].healthy);
    }
}
