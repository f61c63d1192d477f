//! Device inventory loading.
//!
//! The inventory is a TOML file with an optional `[defaults]` table and an
//! ordered `[[devices]]` array. Defaults fill any field a device leaves out.

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::core::models::Device;
use crate::error::InventoryError;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceDefaults {
    platform: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    password_env: Option<String>,
    #[serde(default)]
    extra: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DeviceEntry {
    id: String,
    hostname: Option<String>,
    platform: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    /// Name of an environment variable holding the password.
    password_env: Option<String>,
    #[serde(default)]
    extra: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct InventoryFile {
    #[serde(default)]
    defaults: DeviceDefaults,
    #[serde(default)]
    devices: Vec<DeviceEntry>,
}

/// Read and validate the inventory at `path`, preserving device order.
pub fn load(path: &Path) -> Result<Vec<Device>, InventoryError> {
    let text = std::fs::read_to_string(path).map_err(|source| InventoryError::Read {
        path: path.to_path_buf(),
        source,
    })?;

    let devices = parse(&text)?;
    debug!(path = %path.display(), devices = devices.len(), "Inventory loaded");
    Ok(devices)
}

pub fn parse(text: &str) -> Result<Vec<Device>, InventoryError> {
    let file: InventoryFile = toml::from_str(text)?;
    let defaults = file.defaults;

    file.devices
        .into_iter()
        .enumerate()
        .map(|(index, entry)| resolve(index, entry, &defaults))
        .collect()
}

fn resolve(
    index: usize,
    entry: DeviceEntry,
    defaults: &DeviceDefaults,
) -> Result<Device, InventoryError> {
    let id = entry.id.trim().to_string();
    if id.is_empty() {
        return Err(InventoryError::Invalid {
            index,
            message: "device id must not be empty".to_string(),
        });
    }

    let platform = entry
        .platform
        .or_else(|| defaults.platform.clone())
        .filter(|p| !p.trim().is_empty())
        .ok_or_else(|| InventoryError::Invalid {
            index,
            message: format!("device '{}' has no platform", id),
        })?;

    let password_env = entry
        .password_env
        .as_ref()
        .or(defaults.password_env.as_ref());
    let password = match entry.password.or_else(|| defaults.password.clone()) {
        Some(password) => Some(password),
        None => match password_env {
            Some(var) => Some(std::env::var(var).map_err(|_| InventoryError::Invalid {
                index,
                message: format!("device '{}': environment variable {} is not set", id, var),
            })?),
            None => None,
        },
    };

    let mut extra = defaults.extra.clone();
    extra.extend(entry.extra);

    Ok(Device {
        hostname: entry.hostname.unwrap_or_else(|| id.clone()),
        id,
        platform,
        port: entry.port.or(defaults.port),
        username: entry.username.or_else(|| defaults.username.clone()),
        password,
        extra,
    })
}
