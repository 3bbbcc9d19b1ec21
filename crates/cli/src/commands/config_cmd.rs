//! `tierbot config`: show or initialize configuration.

use std::path::Path;
use tierbot_config::AppConfig;

pub fn run(
    config: Option<AppConfig>,
    config_path: &Path,
    init: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    if init {
        return init_file(config_path);
    }

    let mut config = config.unwrap_or_default();
    if config.decision.api_key.is_some() {
        config.decision.api_key = Some("***".into());
    }

    println!("# {}", config_path.display());
    println!("{}", toml::to_string_pretty(&config)?);
    Ok(())
}

/// Write the default config, leaving an existing file untouched.
fn init_file(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    if path.exists() {
        println!("  ⚠️  {} already exists, leaving it unchanged", path.display());
        return Ok(());
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(path, AppConfig::default_toml())?;
    println!("  ✅ Wrote default config to {}", path.display());
    Ok(())
}
