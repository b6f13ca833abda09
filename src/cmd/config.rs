//! Configuration view and validation: `skyforge config`.

use anyhow::Result;
use std::path::Path;

use skyforge::config::SkyforgeConfig;

pub fn cmd_config(config_path: &Path, check: bool) -> Result<()> {
    let config = SkyforgeConfig::load_or_default(config_path)?;
    let warnings = config.validate();

    if !check {
        if config_path.exists() {
            println!("# Loaded from {}", config_path.display());
        } else {
            println!("# {} not found, showing defaults", config_path.display());
        }
        println!("{}", config.to_toml()?);
    }

    if warnings.is_empty() {
        if check {
            println!("Configuration is valid.");
        }
    } else {
        println!("Warnings:");
        for warning in &warnings {
            println!("  - {}", warning);
        }
    }
    Ok(())
}
