//! File-based configuration loading and saving

use std::fs;
use std::path::Path;

use tracing::debug;

use super::model::ProxyConfig;
use crate::error::{ProxyError, ProxyResult};

/// Load and validate configuration from a file
///
/// Supports JSON and TOML based on the file extension. Returns the default
/// config if the file doesn't exist.
pub fn load_from_file(path: &Path) -> ProxyResult<ProxyConfig> {
    let config = read_from_file(path)?;
    config.validate()?;
    Ok(config)
}

/// Parse a configuration file without validating it
///
/// Lets editors open a file that fails validation so it can be repaired.
pub fn read_from_file(path: &Path) -> ProxyResult<ProxyConfig> {
    if !path.exists() {
        debug!("Config file {:?} not found, using defaults", path);
        return Ok(ProxyConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|e| {
        ProxyError::config_with_context(
            format!("Failed to read config file: {}", e),
            format!("Reading configuration from '{}'", path.display()),
        )
    })?;

    let config: ProxyConfig = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::from_str(&content).map_err(|e| {
            ProxyError::config_with_context(
                format!("Failed to parse TOML config: {}", e),
                format!("Deserializing TOML configuration from '{}'", path.display()),
            )
        })?,
        _ => serde_json::from_str(&content).map_err(|e| {
            ProxyError::config_with_context(
                format!("Failed to parse JSON config: {}", e),
                format!("Deserializing JSON configuration from '{}'", path.display()),
            )
        })?,
    };

    Ok(config)
}

/// Write configuration to a file, creating parent directories as needed
pub fn save_to_file(path: &Path, config: &ProxyConfig) -> ProxyResult<()> {
    config.validate()?;

    let content = match path.extension().and_then(|s| s.to_str()) {
        Some("toml") => toml::to_string_pretty(config).map_err(|e| {
            ProxyError::config(format!("Failed to serialize TOML config: {}", e))
        })?,
        _ => serde_json::to_string_pretty(config)?,
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    fs::write(path, content).map_err(|e| {
        ProxyError::config_with_context(
            format!("Failed to write config file: {}", e),
            format!("Writing configuration to '{}'", path.display()),
        )
    })?;

    debug!("Saved config to {:?}", path);
    Ok(())
}
