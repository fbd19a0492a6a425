//! Configuration types for wg-balancer

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum kernel interface name length (IFNAMSIZ minus the NUL terminator)
pub const INTERFACE_NAME_MAX: usize = 15;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// WireGuard tunnel set and health checking
    pub wireguard: WireGuardConfig,

    /// SOCKS5 proxy listeners
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Stats dashboard (served by an external collaborator)
    #[serde(default)]
    pub webserver: WebServerConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for conn in &self.wireguard.connections {
            conn.validate()?;
        }

        // One listener per tunnel plus the random port must fit in u16
        let n = self.wireguard.connections.len();
        if usize::from(self.proxy.base_port) + n > usize::from(u16::MAX) {
            return Err(ConfigError::ValidationError(format!(
                "base_port {} with {} tunnels overflows the port range",
                self.proxy.base_port, n
            )));
        }

        if self.proxy.buffer_size < 1024 {
            return Err(ConfigError::ValidationError(format!(
                "buffer_size {} is too small (minimum 1024)",
                self.proxy.buffer_size
            )));
        }

        if self.wireguard.health_check_interval == 0 {
            return Err(ConfigError::ValidationError(
                "health_check_interval must be at least 1 second".into(),
            ));
        }

        if self.wireguard.failure_threshold == 0 {
            return Err(ConfigError::ValidationError(
                "failure_threshold must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

/// WireGuard tunnel set configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WireGuardConfig {
    /// Tunnel definitions; may be empty (only the random port listener opens)
    #[serde(default)]
    pub connections: Vec<TunnelConfig>,

    /// Probe cadence in seconds
    #[serde(default = "default_health_check_interval")]
    pub health_check_interval: u64,

    /// Consecutive probe failures before a tunnel is marked unhealthy
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

/// A single WireGuard tunnel definition
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TunnelConfig {
    /// Display name
    pub name: String,

    /// Kernel interface name (e.g., "wg0")
    pub interface_name: String,

    /// Path to the wg-quick-format configuration file
    pub config_path: String,
}

impl TunnelConfig {
    /// Validate a tunnel definition
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::ValidationError(
                "tunnel name must not be empty".into(),
            ));
        }

        if self.interface_name.is_empty() || self.interface_name.len() > INTERFACE_NAME_MAX {
            return Err(ConfigError::ValidationError(format!(
                "interface_name '{}' must be 1-{} bytes",
                self.interface_name, INTERFACE_NAME_MAX
            )));
        }

        if self.config_path.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "config_path for tunnel '{}' must not be empty",
                self.name
            )));
        }

        Ok(())
    }
}

/// SOCKS5 proxy listener configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProxyConfig {
    /// First listener port; port `base_port + 1 + i` pins to tunnel `i`
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// SOCKS5 handshake read deadline in seconds
    #[serde(default = "default_read_timeout")]
    pub read_timeout: u64,

    /// Relay buffer size in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            read_timeout: default_read_timeout(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Stats dashboard configuration (the dashboard itself is external)
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebServerConfig {
    /// Dashboard listen port
    #[serde(default = "default_webserver_port")]
    pub port: u16,
}

impl Default for WebServerConfig {
    fn default() -> Self {
        Self {
            port: default_webserver_port(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_health_check_interval() -> u64 {
    30
}

fn default_failure_threshold() -> u32 {
    3
}

fn default_base_port() -> u16 {
    9930
}

fn default_read_timeout() -> u64 {
    30
}

fn default_buffer_size() -> usize {
    32768
}

fn default_webserver_port() -> u16 {
    9929
}

fn default_log_level() -> String {
    "info".into()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tunnel(name: &str, iface: &str) -> TunnelConfig {
        TunnelConfig {
            name: name.into(),
            interface_name: iface.into(),
            config_path: format!("/etc/wireguard/{iface}.conf"),
        }
    }

    fn base_config() -> Config {
        Config {
            wireguard: WireGuardConfig {
                connections: vec![tunnel("a", "wg0"), tunnel("b", "wg1")],
                health_check_interval: 30,
                failure_threshold: 3,
            },
            proxy: ProxyConfig::default(),
            webserver: WebServerConfig::default(),
            log: LogConfig::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        assert!(base_config().validate().is_ok());
    }

    #[test]
    fn test_zero_tunnels_is_valid() {
        let mut config = base_config();
        config.wireguard.connections.clear();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_interface_name_too_long() {
        let mut config = base_config();
        config.wireguard.connections[0].interface_name = "wg-very-long-name".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_port_overflow() {
        let mut config = base_config();
        config.proxy.base_port = u16::MAX - 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_buffer_size_minimum() {
        let mut config = base_config();
        config.proxy.buffer_size = 512;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_defaults() {
        let proxy = ProxyConfig::default();
        assert_eq!(proxy.base_port, 9930);
        assert_eq!(proxy.read_timeout, 30);
        assert_eq!(proxy.buffer_size, 32768);
        assert_eq!(WebServerConfig::default().port, 9929);
    }
}
