use anyhow::{Context, Result};
use std::path::PathBuf;

use trendcast::config::Config;

/// Print the effective configuration as TOML
pub fn show_config(config_path: Option<PathBuf>) -> Result<()> {
    let config = Config::load(config_path.as_deref()).context("Failed to load configuration")?;
    let rendered = config.to_toml().context("Failed to render configuration")?;

    println!("{rendered}");
    Ok(())
}
