//! `stepwise config` — Configuration management commands.

use stepwise_config::AppConfig;

/// Print the effective configuration with the API key masked.
pub fn show(config: &AppConfig) {
    println!("# {}", AppConfig::config_path().display());
    println!("{}", config.to_redacted_toml());

    if !config.has_api_key() {
        eprintln!("⚠️  No API key set (STEPWISE_API_KEY, OPENAI_API_KEY or OPENROUTER_API_KEY)");
    }
}

pub fn path() {
    println!("{}", AppConfig::config_path().display());
}

/// Write the default config file, refusing to clobber one unless `force`.
pub fn init(force: bool) -> Result<(), Box<dyn std::error::Error>> {
    let path = AppConfig::config_path();
    if path.exists() && !force {
        return Err(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )
        .into());
    }

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(&path, AppConfig::default_toml())?;
    println!("✅ Wrote default config to {}", path.display());
    Ok(())
}
