use super::config::{default_config_path, BridgeConfig};
use std::path::PathBuf;

/// Write the default configuration file
///
/// Refuses to overwrite an existing file unless `force` is set; an existing
/// file may hold cached Matrix identities.
pub fn execute(config_path: Option<String>, force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = config_path
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if config_path.exists() && !force {
        return Err(format!(
            "Config file already exists: {} (use --force to overwrite)",
            config_path.display()
        )
        .into());
    }

    BridgeConfig::create_default(&config_path)?;
    println!("📝 Created: {}", config_path.display());
    Ok(())
}
