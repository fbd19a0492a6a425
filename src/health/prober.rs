//! Periodic health prober
//!
//! One prober drives all tunnels on a single cadence. Each round spawns an
//! independent probe task per tunnel, so a stalled probe on one tunnel
//! never delays the others. The prober is the sole writer of tunnel health
//! state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_rustls::TlsConnector;
use tracing::{debug, info, warn};

use super::probe::{probe_interface, probe_tls_connector};
use crate::stats::StatsTracker;
use crate::tunnel::{Tunnel, TunnelManager};

/// Periodic health prober for the whole tunnel set
pub struct HealthProber {
    manager: Arc<TunnelManager>,
    stats: Arc<StatsTracker>,
    check_interval: Duration,
    connector: TlsConnector,
}

impl HealthProber {
    /// Create a prober; `check_interval` comes from
    /// `wireguard.health_check_interval`
    #[must_use]
    pub fn new(
        manager: Arc<TunnelManager>,
        stats: Arc<StatsTracker>,
        check_interval: Duration,
    ) -> Self {
        Self {
            manager,
            stats,
            check_interval,
            connector: probe_tls_connector(),
        }
    }

    /// Probe every tunnel once and wait for the results, logging only.
    ///
    /// This startup pass surfaces dead tunnels in the log before the
    /// listeners open; it touches neither health state nor stats. The
    /// state machine advances only through the rounds issued by
    /// [`run`](Self::run), starting with its immediate first round.
    pub async fn initial_round(&self) {
        let mut set = JoinSet::new();
        for tunnel in self.manager.tunnels() {
            let tunnel = Arc::clone(tunnel);
            let connector = self.connector.clone();
            set.spawn(async move {
                match probe_interface(&tunnel.interface_name, &connector).await {
                    Ok(latency) => {
                        debug!(
                            tunnel = %tunnel.name,
                            latency_ms = latency.as_millis() as u64,
                            "Initial health check succeeded"
                        );
                    }
                    Err(e) => {
                        warn!(tunnel = %tunnel.name, error = %e, "Initial health check failed");
                    }
                }
            });
        }
        while set.join_next().await.is_some() {}
    }

    /// Run until the shutdown signal fires.
    ///
    /// An immediate round is issued at start, the first to update health
    /// state; afterwards one round per `check_interval` tick. Rounds are
    /// fire-and-forget: probes from a slow round may still be in flight
    /// when the next round starts.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.check_interval.as_secs(),
            "Starting health checks"
        );

        self.spawn_round();

        let mut ticker = tokio::time::interval(self.check_interval);
        // The first tick completes immediately; consume it so the periodic
        // rounds start one full interval after the round above
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => self.spawn_round(),
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        debug!("Health prober shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Spawn one detached probe task per tunnel
    fn spawn_round(&self) {
        for tunnel in self.manager.tunnels() {
            tokio::spawn(probe_and_record(
                Arc::clone(tunnel),
                self.manager.failure_threshold(),
                Arc::clone(&self.stats),
                self.connector.clone(),
            ));
        }
    }
}

/// Probe one tunnel and fold the outcome into its health state
async fn probe_and_record(
    tunnel: Arc<Tunnel>,
    failure_threshold: u32,
    stats: Arc<StatsTracker>,
    connector: TlsConnector,
) {
    let result = probe_interface(&tunnel.interface_name, &connector).await;
    tunnel.touch_probe_time();

    match result {
        Ok(latency) => {
            stats.record_latency(tunnel.index, latency);
            if tunnel.record_success() {
                info!(tunnel = %tunnel.name, latency_ms = latency.as_millis() as u64, "Connection is now healthy");
                stats.set_health(tunnel.index, true);
            }
        }
        Err(e) => {
            let transitioned = tunnel.record_failure(failure_threshold);
            debug!(
                tunnel = %tunnel.name,
                failures = tunnel.consecutive_failures(),
                error = %e,
                "Health check failed"
            );
            if transitioned {
                warn!(tunnel = %tunnel.name, "Marking connection as unhealthy");
                stats.set_health(tunnel.index, false);
            }
        }
    }
}
