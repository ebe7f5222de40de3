//! `--show-settings` implementation.

use std::path::Path;

use anyhow::{Context, Result};
use config_loader::ConfigFormat;

/// Render the configuration at `path` as TOML, or JSON with `json`
pub fn render_settings(path: &Path, json: bool) -> Result<String> {
    let config = config_loader::load(path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    let format = if json { ConfigFormat::Json } else { ConfigFormat::Toml };
    Ok(format.render(&config)?)
}

/// Print the parsed configuration and exit
pub fn show_settings(path: &Path, json: bool) -> Result<()> {
    println!("{}", render_settings(path, json)?);
    Ok(())
}
