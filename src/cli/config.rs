//! Configuration file management

use colored::Colorize;
use vpnkit_core::config::toml_config;
use vpnkit_core::config::CoreConfig;
use vpnkit_core::error::CoreError;

use super::effective_config;

pub fn run_config_init(force: bool) -> Result<(), CoreError> {
    let path = toml_config::get_config_path()?;
    if toml_config::config_exists()? && !force {
        println!("Configuration already exists at {}", path.display());
        println!("Use --force to overwrite it.");
        return Ok(());
    }

    toml_config::save_config(&CoreConfig::default())?;
    println!("{} Wrote default configuration to {}", "✓".green(), path.display());
    Ok(())
}

pub fn run_config_show() -> Result<(), CoreError> {
    if !toml_config::config_exists()? {
        println!("{}", "# No configuration file, showing defaults".dimmed());
    }
    let config = effective_config()?;
    print!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

pub fn run_config_validate() -> Result<(), CoreError> {
    let path = toml_config::get_config_path()?;
    toml_config::load_config_from_path(&path)?;
    println!("{} {} is valid", "✓".green(), path.display());
    Ok(())
}
