//! TOML configuration file I/O
//!
//! Handles loading and saving `CoreConfig` to/from TOML files in the
//! user's configuration directory.

use crate::config::CoreConfig;
use crate::error::{ConfigError, CoreError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the default configuration directory
///
/// Returns ~/.config/vpnkit, or VPNKIT_CONFIG_DIR if set
pub fn get_config_dir() -> Result<PathBuf, CoreError> {
    if let Ok(config_dir) = std::env::var("VPNKIT_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let home = std::env::var("HOME").map_err(|_| {
        CoreError::Config(ConfigError::IoError {
            message: "HOME environment variable not set".to_string(),
        })
    })?;

    Ok(PathBuf::from(home).join(".config").join("vpnkit"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, CoreError> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from the default TOML file
pub fn load_config() -> Result<CoreConfig, CoreError> {
    let config_path = get_config_path()?;
    load_config_from_path(&config_path)
}

/// Load configuration from a specific TOML file
///
/// Missing sections and fields fall back to their defaults; the result is
/// validated before it is returned.
pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> Result<CoreConfig, CoreError> {
    let contents = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => CoreError::Config(ConfigError::LoadFailed {
            path: path.as_ref().to_string_lossy().to_string(),
        }),
        _ => CoreError::Config(ConfigError::IoError {
            message: format!("Failed to read config file: {}", e),
        }),
    })?;

    let config: CoreConfig = toml::from_str(&contents).map_err(|e| {
        CoreError::Config(ConfigError::IoError {
            message: format!("Failed to parse TOML: {}", e),
        })
    })?;

    config
        .validate()
        .map_err(|e| CoreError::Config(ConfigError::Validation(e)))?;

    debug!(path = %path.as_ref().display(), "Loaded configuration");
    Ok(config)
}

/// Save configuration to the default TOML file
pub fn save_config(config: &CoreConfig) -> Result<(), CoreError> {
    let config_path = get_config_path()?;
    save_config_to_path(config, &config_path)
}

/// Save configuration to a specific TOML file
pub fn save_config_to_path<P: AsRef<Path>>(config: &CoreConfig, path: P) -> Result<(), CoreError> {
    config
        .validate()
        .map_err(|e| CoreError::Config(ConfigError::Validation(e)))?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            CoreError::Config(ConfigError::IoError {
                message: format!("Failed to create config directory: {}", e),
            })
        })?;
    }

    let contents = toml::to_string_pretty(config)?;

    std::fs::write(&path, contents).map_err(|_e| {
        CoreError::Config(ConfigError::SaveFailed {
            path: path.as_ref().to_string_lossy().to_string(),
        })
    })?;

    info!("Saved configuration to {:?}", path.as_ref());
    Ok(())
}

/// Check if a configuration file exists
pub fn config_exists() -> Result<bool, CoreError> {
    let config_path = get_config_path()?;
    Ok(config_path.exists())
}
