//! Kernel interface provisioning
//!
//! Provisioning shells out to the `ip` and `wg` utilities, matching the
//! steps of `wg-quick up` minus everything route-related. No routes are
//! ever installed: multiple tunnels with default routes would conflict,
//! and egress selection is enforced per socket with `SO_BINDTODEVICE`
//! instead.

use std::io::Write;
use std::os::unix::fs::PermissionsExt;

use tempfile::NamedTempFile;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::connection::Tunnel;
use super::wgconf::split_config;
use crate::error::TunnelError;

/// MTU applied to every tunnel interface
const TUNNEL_MTU: &str = "1420";

/// Run an external command, returning success and its combined output
async fn run_command(program: &str, args: &[&str]) -> std::io::Result<(bool, String)> {
    let output = Command::new(program).args(args).output().await?;

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));

    Ok((output.status.success(), combined.trim().to_string()))
}

/// Check the config file permissions and tighten them to 0600 if needed.
/// Overly permissive files are fixed best-effort; only an unreadable file
/// is fatal.
fn enforce_config_permissions(tunnel: &Tunnel) -> Result<(), TunnelError> {
    let metadata = std::fs::metadata(&tunnel.config_path)
        .map_err(|e| TunnelError::config_file(&tunnel.name, e.to_string()))?;

    let mode = metadata.permissions().mode() & 0o777;
    if mode != 0o600 {
        warn!(
            tunnel = %tunnel.name,
            path = %tunnel.config_path.display(),
            mode = %format!("{mode:o}"),
            "Config file permissions should be 0600, attempting to fix"
        );
        if let Err(e) =
            std::fs::set_permissions(&tunnel.config_path, std::fs::Permissions::from_mode(0o600))
        {
            warn!(tunnel = %tunnel.name, error = %e, "Could not fix config file permissions");
        }
    } else {
        debug!(tunnel = %tunnel.name, "Config file permissions are 0600");
    }

    Ok(())
}

/// Bring up a tunnel's kernel interface.
///
/// Fatal failures (config unreadable, no addresses, `wg setconf` rejected,
/// link-up failure) leave the tunnel in the set but permanently unhealthy;
/// the caller logs and continues with the remaining tunnels.
///
/// # Errors
///
/// Returns `TunnelError` on any fatal provisioning step.
pub async fn provision(tunnel: &Tunnel) -> Result<(), TunnelError> {
    info!(
        tunnel = %tunnel.name,
        interface = %tunnel.interface_name,
        "Bringing up WireGuard connection"
    );

    enforce_config_permissions(tunnel)?;

    // Remove any stale interface with the same name
    let _ = run_command("ip", &["link", "del", &tunnel.interface_name]).await;

    // Create the WireGuard interface; it may already exist
    match run_command(
        "ip",
        &["link", "add", "dev", &tunnel.interface_name, "type", "wireguard"],
    )
    .await
    {
        Ok((true, _)) => {}
        Ok((false, output)) => {
            debug!(tunnel = %tunnel.name, output = %output, "ip link add reported an error, continuing");
        }
        Err(e) => return Err(TunnelError::from(e)),
    }

    let contents = std::fs::read_to_string(&tunnel.config_path)
        .map_err(|e| TunnelError::config_file(&tunnel.name, e.to_string()))?;
    let split = split_config(&contents, &tunnel.name)?;

    // wg setconf reads the filtered config from a file
    let mut tmp = NamedTempFile::new().map_err(TunnelError::from)?;
    tmp.write_all(split.wg_config.as_bytes())
        .map_err(TunnelError::from)?;
    tmp.flush().map_err(TunnelError::from)?;

    let tmp_path = tmp.path().to_string_lossy().into_owned();
    let (ok, output) = run_command("wg", &["setconf", &tunnel.interface_name, &tmp_path]).await?;
    if !ok {
        return Err(TunnelError::command_failed(
            &tunnel.name,
            "wg setconf",
            output,
        ));
    }

    for address in &split.addresses {
        let (ok, output) = run_command(
            "ip",
            &["address", "add", address, "dev", &tunnel.interface_name],
        )
        .await?;
        if !ok {
            // Most likely the address is already present
            warn!(tunnel = %tunnel.name, address = %address, output = %output, "Could not add address");
        }
    }

    let (ok, output) =
        run_command("ip", &["link", "set", "up", "dev", &tunnel.interface_name]).await?;
    if !ok {
        return Err(TunnelError::command_failed(
            &tunnel.name,
            "ip link set up",
            output,
        ));
    }

    let _ = run_command(
        "ip",
        &["link", "set", "dev", &tunnel.interface_name, "mtu", TUNNEL_MTU],
    )
    .await;

    info!(
        tunnel = %tunnel.name,
        interface = %tunnel.interface_name,
        addresses = ?split.addresses,
        "Connection is up (no default route installed)"
    );

    Ok(())
}

/// Delete a tunnel's kernel interface, best effort
pub async fn teardown(tunnel: &Tunnel) {
    info!(tunnel = %tunnel.name, interface = %tunnel.interface_name, "Bringing down connection");

    match run_command("ip", &["link", "del", &tunnel.interface_name]).await {
        Ok((true, _)) => {}
        Ok((false, output)) => {
            warn!(
                interface = %tunnel.interface_name,
                output = %output,
                "Error removing interface"
            );
        }
        Err(e) => {
            warn!(interface = %tunnel.interface_name, error = %e, "Error removing interface");
        }
    }
}
