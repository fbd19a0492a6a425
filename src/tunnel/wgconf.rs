//! wg-quick configuration splitting
//!
//! `wg setconf` rejects the wg-quick-only keys (`Address`, `DNS`, `MTU`,
//! hooks, ...), so the provisioner splits a wg-quick file into the address
//! list and a filtered configuration it can apply directly. Everything
//! else, including comments, blank lines, and the whole `[Peer]` sections,
//! passes through verbatim.

use crate::error::TunnelError;

/// Keys that wg-quick understands but `wg setconf` does not.
/// `Address` is handled separately because its values are extracted.
const INTERFACE_ONLY_KEYS: &[&str] = &[
    "DNS", "MTU", "Table", "PreUp", "PostUp", "PreDown", "PostDown", "SaveConfig",
];

/// Result of splitting a wg-quick configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitConfig {
    /// The configuration with wg-quick-only keys removed, suitable for
    /// `wg setconf`
    pub wg_config: String,
    /// The `Address` CIDRs in file order
    pub addresses: Vec<String>,
}

/// Split a wg-quick configuration into addresses and a `wg setconf` payload.
///
/// # Errors
///
/// Returns `TunnelError::NoAddress` if no `Address` value was found; the
/// tunnel cannot be provisioned without one.
pub fn split_config(contents: &str, tunnel_name: &str) -> Result<SplitConfig, TunnelError> {
    let mut wg_config = String::with_capacity(contents.len());
    let mut addresses = Vec::new();
    let mut in_interface = false;

    for line in contents.lines() {
        let trimmed = line.trim();

        // Section headers: track whether we are inside [Interface]
        if trimmed == "[Interface]" {
            in_interface = true;
            wg_config.push_str(line);
            wg_config.push('\n');
            continue;
        }
        if trimmed.starts_with('[') {
            in_interface = false;
            wg_config.push_str(line);
            wg_config.push('\n');
            continue;
        }

        // Comments and blank lines pass through
        if trimmed.is_empty() || trimmed.starts_with('#') || trimmed.starts_with(';') {
            wg_config.push_str(line);
            wg_config.push('\n');
            continue;
        }

        if let Some((key, value)) = trimmed.split_once('=') {
            let key = key.trim();
            let value = value.trim();

            if in_interface && key == "Address" {
                for addr in value.split(',') {
                    let addr = addr.trim();
                    if !addr.is_empty() {
                        addresses.push(addr.to_string());
                    }
                }
                continue;
            }

            if in_interface && INTERFACE_ONLY_KEYS.contains(&key) {
                tracing::debug!(tunnel = %tunnel_name, key, "Skipping interface-only setting");
                continue;
            }
        }

        wg_config.push_str(line);
        wg_config.push('\n');
    }

    if addresses.is_empty() {
        return Err(TunnelError::NoAddress {
            name: tunnel_name.to_string(),
        });
    }

    Ok(SplitConfig {
        wg_config,
        addresses,
    })
}
