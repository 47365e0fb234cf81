//! Configuration file loading.
//!
//! The gateway core treats the configuration feeder as an external
//! collaborator; this is the JSON file feeder the server binary uses.

use crate::models::settings::GatewaySettings;
use log::debug;
use std::fs;
use std::path::Path;

/// Loads the gateway configuration from the file system.
///
/// The path comes from `PORTICO_CONFIG_PATH` (default `./config.json`). The
/// file must live inside the working directory and is capped at 10 MB.
///
/// # Errors
///
/// Returns an error for a missing or oversized file, a path escaping the
/// working directory, or JSON that does not match [`GatewaySettings`].
pub fn load_settings() -> Result<GatewaySettings, Box<dyn std::error::Error>> {
    let config_path =
        std::env::var("PORTICO_CONFIG_PATH").unwrap_or_else(|_| "./config.json".to_string());

    debug!("Loading configuration from: {}", config_path);

    let path = Path::new(&config_path);
    if !path.exists() {
        return Err(format!("Cannot resolve config path '{}'", config_path).into());
    }

    let canonical_path = path
        .canonicalize()
        .map_err(|e| format!("Cannot resolve config path '{}': {}", config_path, e))?;

    let current_dir =
        std::env::current_dir().map_err(|e| format!("Cannot get current directory: {}", e))?;

    if !canonical_path.starts_with(&current_dir) {
        return Err("Config path outside working directory".into());
    }

    let metadata = fs::metadata(&canonical_path)
        .map_err(|e| format!("Cannot read config file metadata: {}", e))?;

    const MAX_CONFIG_SIZE: u64 = 10 * 1024 * 1024; // 10MB
    if metadata.len() > MAX_CONFIG_SIZE {
        return Err(format!(
            "Config file too large: {} bytes (max: {} bytes)",
            metadata.len(),
            MAX_CONFIG_SIZE
        )
        .into());
    }

    let config_data = fs::read_to_string(&canonical_path)
        .map_err(|e| format!("Cannot read config file: {}", e))?;

    let settings: GatewaySettings =
        serde_json::from_str(&config_data).map_err(|e| format!("Invalid JSON: {}", e))?;

    debug!(
        "Successfully loaded configuration with {} backends and {} routes",
        settings.backend_ids().len(),
        settings.routes.len()
    );

    Ok(settings)
}
