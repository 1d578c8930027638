//! Config command - show the effective configuration

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;

use ttdlog_core::TtdConfig;

/// Arguments for the config command
#[derive(Args)]
pub struct ConfigArgs {
    /// Configuration file to load instead of the platform default
    #[arg(long)]
    pub path: Option<PathBuf>,
}

/// Execute the config command
pub fn execute(args: ConfigArgs) -> Result<()> {
    let config = match &args.path {
        Some(path) => TtdConfig::load(path)
            .with_context(|| format!("Failed to load config: {}", path.display()))?,
        None => TtdConfig::load_or_default(),
    };

    for warning in config.validate() {
        tracing::warn!("{}", warning);
    }

    let text = config
        .to_toml_string()
        .context("Failed to serialize config")?;
    print!("{}", text);

    match config.log_path() {
        Some(path) => println!("\n# log file: {}", path.display()),
        None => println!("\n# log file: (no data directory available)"),
    }
    Ok(())
}
