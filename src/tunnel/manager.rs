//! Tunnel lifecycle and selection pool
//!
//! `TunnelManager` owns every tunnel for the process lifetime. It
//! provisions kernel interfaces in parallel at boot, tears them down at
//! shutdown, and serves the two selection operations used by the SOCKS5
//! listeners: a specific tunnel by index, or a uniformly random healthy
//! tunnel.

use std::sync::Arc;

use rand::Rng;
use tokio::task::JoinSet;
use tracing::warn;

use super::connection::Tunnel;
use super::provision;
use crate::config::WireGuardConfig;
use crate::error::TunnelError;

/// Owns the tunnel set and serves the selection pool
pub struct TunnelManager {
    tunnels: Vec<Arc<Tunnel>>,
    failure_threshold: u32,
}

impl TunnelManager {
    /// Build the tunnel set from configuration; all tunnels start unhealthy
    #[must_use]
    pub fn new(config: &WireGuardConfig) -> Self {
        let tunnels = config
            .connections
            .iter()
            .enumerate()
            .map(|(index, conn)| Arc::new(Tunnel::new(index, conn)))
            .collect();

        Self {
            tunnels,
            failure_threshold: config.failure_threshold,
        }
    }

    /// Number of configured tunnels
    #[must_use]
    pub fn len(&self) -> usize {
        self.tunnels.len()
    }

    /// Whether no tunnels are configured
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tunnels.is_empty()
    }

    /// Consecutive failures required to mark a tunnel unhealthy
    #[must_use]
    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    /// All tunnels, in index order
    #[must_use]
    pub fn tunnels(&self) -> &[Arc<Tunnel>] {
        &self.tunnels
    }

    /// Provision every tunnel's kernel interface in parallel.
    ///
    /// Per-tunnel failures are logged as warnings and do not stop the
    /// others; a failed tunnel stays in the set and never becomes healthy.
    /// Returns the number of tunnels that provisioned successfully, so the
    /// caller can treat an all-tunnels failure as fatal at startup.
    pub async fn provision_all(&self) -> usize {
        let mut set = JoinSet::new();

        for tunnel in &self.tunnels {
            let tunnel = Arc::clone(tunnel);
            set.spawn(async move {
                match provision::provision(&tunnel).await {
                    Ok(()) => true,
                    Err(e) => {
                        warn!(tunnel = %tunnel.name, error = %e, "Provisioning failed");
                        false
                    }
                }
            });
        }

        let mut provisioned = 0;
        while let Some(result) = set.join_next().await {
            if matches!(result, Ok(true)) {
                provisioned += 1;
            }
        }
        provisioned
    }

    /// Tear down every tunnel's kernel interface in parallel, best effort
    pub async fn teardown_all(&self) {
        let mut set = JoinSet::new();

        for tunnel in &self.tunnels {
            let tunnel = Arc::clone(tunnel);
            set.spawn(async move {
                provision::teardown(&tunnel).await;
            });
        }

        while set.join_next().await.is_some() {}
    }

    /// Get the tunnel at `index` iff it is currently healthy
    ///
    /// # Errors
    ///
    /// Returns `TunnelError::InvalidIndex` for an out-of-range index and
    /// `TunnelError::NotHealthy` when the tunnel is not in the pool.
    pub fn get(&self, index: usize) -> Result<Arc<Tunnel>, TunnelError> {
        let tunnel = self
            .tunnels
            .get(index)
            .ok_or(TunnelError::InvalidIndex { index })?;

        if !tunnel.is_healthy() {
            return Err(TunnelError::NotHealthy {
                name: tunnel.name.clone(),
            });
        }

        Ok(Arc::clone(tunnel))
    }

    /// Pick a uniformly random healthy tunnel.
    ///
    /// Selection is memoryless: no stickiness, no weighting, just a
    /// snapshot of the healthy subset and a PRNG draw.
    ///
    /// # Errors
    ///
    /// Returns `TunnelError::NoHealthyTunnels` when the healthy set is
    /// empty.
    pub fn get_any(&self) -> Result<Arc<Tunnel>, TunnelError> {
        let healthy: Vec<&Arc<Tunnel>> =
            self.tunnels.iter().filter(|t| t.is_healthy()).collect();

        if healthy.is_empty() {
            return Err(TunnelError::NoHealthyTunnels);
        }

        let idx = rand::thread_rng().gen_range(0..healthy.len());
        Ok(Arc::clone(healthy[idx]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TunnelConfig;

    fn manager(names: &[&str]) -> TunnelManager {
        let config = WireGuardConfig {
            connections: names
                .iter()
                .map(|name| TunnelConfig {
                    name: (*name).into(),
                    interface_name: format!("wg-{name}"),
                    config_path: format!("/etc/wireguard/{name}.conf"),
                })
                .collect(),
            health_check_interval: 30,
            failure_threshold: 3,
        };
        TunnelManager::new(&config)
    }

    #[test]
    fn test_get_out_of_range() {
        let m = manager(&["a"]);
        assert!(matches!(m.get(1), Err(TunnelError::InvalidIndex { .. })));
    }

    #[test]
    fn test_get_unhealthy_tunnel_fails() {
        let m = manager(&["a"]);
        assert!(matches!(m.get(0), Err(TunnelError::NotHealthy { .. })));
    }

    #[test]
    fn test_get_healthy_tunnel() {
        let m = manager(&["a"]);
        m.tunnels()[0].record_success();
        let t = m.get(0).unwrap();
        assert_eq!(t.name, "a");
    }

    #[test]
    fn test_get_any_empty_pool() {
        let m = manager(&["a", "b"]);
        assert!(matches!(m.get_any(), Err(TunnelError::NoHealthyTunnels)));
    }

    #[test]
    fn test_get_any_skips_unhealthy() {
        let m = manager(&["a", "b"]);
        m.tunnels()[1].record_success();
        for _ in 0..20 {
            assert_eq!(m.get_any().unwrap().name, "b");
        }
    }

    #[test]
    fn test_get_any_observes_all_healthy_tunnels() {
        let m = manager(&["a", "b"]);
        for tunnel in m.tunnels() {
            tunnel.record_success();
        }

        // Over 50 draws both tunnels should be selected
        let mut seen = [false; 2];
        for _ in 0..50 {
            seen[m.get_any().unwrap().index] = true;
        }
        assert!(seen[0] && seen[1], "both healthy tunnels should be chosen");
    }

    #[test]
    fn test_zero_tunnels() {
        let m = manager(&[]);
        assert!(m.is_empty());
        assert!(matches!(m.get_any(), Err(TunnelError::NoHealthyTunnels)));
        assert!(matches!(m.get(0), Err(TunnelError::InvalidIndex { .. })));
    }
}
