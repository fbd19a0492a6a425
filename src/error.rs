//! Error types for wg-balancer
//!
//! Errors are categorized by subsystem. Startup-fatal conditions (config,
//! listener bind) abort the process; tunnel and dial errors are scoped to a
//! single tunnel or client connection.

use std::io;

use thiserror::Error;

/// Top-level error type for wg-balancer
#[derive(Debug, Error)]
pub enum WgBalancerError {
    /// Configuration errors (file loading, parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Tunnel provisioning and selection errors
    #[error("Tunnel error: {0}")]
    Tunnel(#[from] TunnelError),

    /// Interface-bound dial errors
    #[error("Dial error: {0}")]
    Dial(#[from] DialError),

    /// SOCKS5 protocol and listener errors
    #[error("Proxy error: {0}")]
    Proxy(#[from] ProxyError),

    /// I/O errors not covered by other categories
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl WgBalancerError {
    /// Check if this error is recoverable (the process can keep serving)
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Self::Config(_) => false,
            Self::Tunnel(e) => e.is_recoverable(),
            Self::Dial(_) | Self::Proxy(_) => true,
            Self::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
            ),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// YAML parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

/// Tunnel provisioning and selection errors
#[derive(Debug, Error)]
pub enum TunnelError {
    /// Config file could not be read
    #[error("Tunnel config file error for {name}: {reason}")]
    ConfigFile { name: String, reason: String },

    /// wg-quick config had no Address entry
    #[error("No Address found in config for tunnel {name}")]
    NoAddress { name: String },

    /// An external command (`ip`, `wg`) failed on a fatal step
    #[error("Command `{command}` failed for tunnel {name}: {output}")]
    CommandFailed {
        name: String,
        command: String,
        output: String,
    },

    /// Tunnel index out of range
    #[error("Invalid tunnel index: {index}")]
    InvalidIndex { index: usize },

    /// The requested tunnel is not currently healthy
    #[error("Tunnel {name} is not healthy")]
    NotHealthy { name: String },

    /// No tunnel in the pool is healthy
    #[error("No healthy connections available")]
    NoHealthyTunnels,

    /// I/O error during provisioning
    #[error("Tunnel I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl TunnelError {
    /// Selection failures recover on the next probe round; provisioning
    /// failures do not (the tunnel stays unhealthy for the process lifetime).
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::InvalidIndex { .. } | Self::NotHealthy { .. } | Self::NoHealthyTunnels
        )
    }

    /// Create a config file error
    pub fn config_file(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigFile {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a command failure error
    pub fn command_failed(
        name: impl Into<String>,
        command: impl Into<String>,
        output: impl Into<String>,
    ) -> Self {
        Self::CommandFailed {
            name: name.into(),
            command: command.into(),
            output: output.into(),
        }
    }
}

/// Interface-bound dial errors
#[derive(Debug, Error)]
pub enum DialError {
    /// Target hostname did not resolve
    #[error("Failed to resolve {target}: {reason}")]
    Resolve { target: String, reason: String },

    /// Connection attempt failed
    #[error("Failed to connect to {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    /// Connection attempt exceeded the dial timeout
    #[error("Connection to {target} timed out after {timeout_secs}s")]
    Timeout { target: String, timeout_secs: u64 },

    /// Failed to set a socket option (`SO_BINDTODEVICE` needs CAP_NET_ADMIN)
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// I/O error during dial
    #[error("Dial I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl DialError {
    /// Create a resolve error
    pub fn resolve(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Resolve {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a connection failed error
    pub fn connection_failed(target: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Health probe errors; transient, counted toward the failure threshold
/// and never surfaced to clients
#[derive(Debug, Error)]
pub enum ProbeError {
    /// Could not dial the probe target through the tunnel
    #[error("Probe dial failed: {0}")]
    Dial(#[from] DialError),

    /// TLS handshake with the probe target failed
    #[error("Probe TLS handshake failed: {0}")]
    Tls(String),

    /// The probe target answered with a non-200 status
    #[error("Unexpected status code: {status}")]
    UnexpectedStatus { status: u16 },

    /// The response could not be parsed as HTTP
    #[error("Malformed probe response: {0}")]
    BadResponse(String),

    /// The probe exceeded its overall deadline
    #[error("Probe timed out after {deadline_secs}s")]
    Timeout { deadline_secs: u64 },

    /// I/O error while talking to the probe target
    #[error("Probe I/O error: {0}")]
    IoError(#[from] io::Error),
}

/// SOCKS5 protocol and listener errors
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Failed to bind a listener (startup-fatal)
    #[error("Failed to listen on {addr}: {reason}")]
    BindError { addr: String, reason: String },

    /// Client violated the SOCKS5 framing; the connection is closed silently
    #[error("SOCKS5 protocol violation: {0}")]
    Protocol(String),

    /// I/O error on the client connection
    #[error("Proxy I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl ProxyError {
    /// Create a protocol violation error
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    /// Create a bind error
    pub fn bind(addr: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr: addr.into(),
            reason: reason.into(),
        }
    }
}

/// Type alias for Result with WgBalancerError
pub type Result<T> = std::result::Result<T, WgBalancerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_recovery_classification() {
        let config_err = ConfigError::ValidationError("test".into());
        assert!(!WgBalancerError::from(config_err).is_recoverable());

        // Selection failures are transient
        assert!(TunnelError::NoHealthyTunnels.is_recoverable());
        assert!(TunnelError::NotHealthy { name: "a".into() }.is_recoverable());

        // Provisioning failures are permanent for the tunnel
        let prov_err = TunnelError::command_failed("a", "wg setconf", "bad key");
        assert!(!prov_err.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = TunnelError::NoHealthyTunnels;
        assert_eq!(err.to_string(), "No healthy connections available");

        let err = DialError::Timeout {
            target: "example.com:443".into(),
            timeout_secs: 10,
        };
        assert!(err.to_string().contains("example.com:443"));
        assert!(err.to_string().contains("10"));
    }
}
