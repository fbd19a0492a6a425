//! Configuration types and loading
//!
//! Configuration is loaded from a YAML file and validated at startup.

mod loader;
mod types;

pub use loader::{load_config, load_config_str};
pub use types::{
    Config, LogConfig, ProxyConfig, TunnelConfig, WebServerConfig, WireGuardConfig,
};
