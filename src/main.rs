//! wg-balancer: SOCKS5 gateway over a pool of WireGuard tunnels
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration path
//! sudo ./wg-balancer
//!
//! # Run with a custom configuration
//! sudo ./wg-balancer -c /path/to/config.yml
//!
//! # Validate a configuration and exit
//! wg-balancer -c config.yml --check
//! ```
//!
//! Provisioning interfaces and binding sockets to them requires
//! `CAP_NET_ADMIN` (or root).

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use wg_balancer::config::{load_config, Config};
use wg_balancer::health::HealthProber;
use wg_balancer::io::RelayBufferPool;
use wg_balancer::outbound::{has_net_admin_capability, is_root};
use wg_balancer::proxy::ProxyServer;
use wg_balancer::stats::StatsTracker;
use wg_balancer::tunnel::TunnelManager;

/// How long shutdown waits for in-flight handlers before forcing exit
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Check configuration only
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("/etc/wg-balancer/config.yml");
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("wg-balancer v{}", wg_balancer::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"wg-balancer v{}

SOCKS5 gateway that balances outbound TCP across WireGuard tunnels.

USAGE:
    wg-balancer [OPTIONS]

OPTIONS:
    -c, --config <PATH>    Configuration file path [default: /etc/wg-balancer/config.yml]
    --check                Check configuration and exit
    -h, --help             Print help information
    -v, --version          Print version information

PORTS:
    base_port          any healthy tunnel, chosen per connection
    base_port + 1 + i  pinned to tunnel i

REQUIREMENTS:
    - Linux with WireGuard support and the `ip` / `wg` utilities
    - CAP_NET_ADMIN capability (or root) for interface provisioning
      and SO_BINDTODEVICE
"#,
        wg_balancer::VERSION
    );
}

/// Initialize logging; `RUST_LOG` wins over the config level
fn init_logging(config: &Config) {
    let level = match config.log.level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("rustls=warn".parse().unwrap())
        .add_directive("tokio=warn".parse().unwrap());

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = load_config(&args.config_path).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load configuration from {:?}: {}",
            args.config_path,
            e
        )
    })?;

    if args.check_config {
        println!("Configuration is valid");
        return Ok(());
    }

    init_logging(&config);

    info!("wg-balancer v{}", wg_balancer::VERSION);
    info!("Configuration loaded from {:?}", args.config_path);

    if !is_root() && !has_net_admin_capability() {
        warn!("Not running as root and CAP_NET_ADMIN not detected");
        warn!("Interface provisioning and SO_BINDTODEVICE will fail without it");
    }

    let num_tunnels = config.wireguard.connections.len();
    let stats = Arc::new(StatsTracker::new(num_tunnels));
    let manager = Arc::new(TunnelManager::new(&config.wireguard));

    // Bring up all kernel interfaces; per-tunnel failures are warnings,
    // but a fully failed tunnel set cannot serve anything
    info!("Initializing WireGuard connections...");
    let provisioned = manager.provision_all().await;
    if num_tunnels > 0 && provisioned == 0 {
        anyhow::bail!("All {num_tunnels} tunnels failed to provision");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // A log-only probe round surfaces dead tunnels at boot; the prober's
    // own immediate first round is the one that updates health state
    let prober = HealthProber::new(
        Arc::clone(&manager),
        Arc::clone(&stats),
        Duration::from_secs(config.wireguard.health_check_interval),
    );
    prober.initial_round().await;

    let prober_handle = tokio::spawn(prober.run(shutdown_rx.clone()));

    let buffer_pool = Arc::new(RelayBufferPool::with_buffer_size(config.proxy.buffer_size));
    let read_timeout = Duration::from_secs(config.proxy.read_timeout);

    // N+1 listeners: index 0 is the any-tunnel port, index k pins tunnel k-1
    let mut server_handles = Vec::with_capacity(num_tunnels + 1);
    for index in 0..=num_tunnels {
        let port = config.proxy.base_port + index as u16;
        let server = ProxyServer::bind(
            index,
            port,
            Arc::clone(&manager),
            Arc::clone(&stats),
            Arc::clone(&buffer_pool),
            read_timeout,
        )
        .await
        .map_err(|e| anyhow::anyhow!("Failed to start proxy on port {port}: {e}"))?;

        server_handles.push(tokio::spawn(server.run(shutdown_rx.clone())));
    }

    info!("wg-balancer started successfully");
    info!("Random proxy: localhost:{}", config.proxy.base_port);
    for (i, conn) in config.wireguard.connections.iter().enumerate() {
        info!(
            "Connection {} ({}) proxy: localhost:{}",
            i,
            conn.name,
            config.proxy.base_port + 1 + i as u16
        );
    }
    info!("Stats dashboard port: {}", config.webserver.port);

    // Wait for SIGINT or SIGTERM
    tokio::select! {
        _ = signal::ctrl_c() => {
            info!("Received SIGINT, initiating shutdown...");
        }
        _ = wait_for_sigterm() => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    info!("Shutting down gracefully...");
    let _ = shutdown_tx.send(true);

    // Accept loops exit promptly; in-flight handlers get one shared
    // drain window before we proceed to teardown
    let drain = async {
        for handle in server_handles {
            let _ = handle.await;
        }
    };
    if tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, drain).await.is_err() {
        warn!("Shutdown timeout, forcing exit");
    } else {
        info!("All proxies stopped");
    }

    let _ = tokio::time::timeout(Duration::from_secs(1), prober_handle).await;

    manager.teardown_all().await;

    info!(
        "Shutdown complete ({} requests served)",
        stats.total_requests()
    );

    Ok(())
}

/// Wait for SIGTERM
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to register SIGTERM handler");
    sigterm.recv().await;
}
