//! Logging bootstrap and role dispatch.

pub mod commands;

use crate::config::{Config, Role};
use anyhow::{anyhow, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

/// Run the scanner in the configured role.
pub async fn run() -> Result<()> {
    let config = Config::parse();
    init_logging(&config.log_level)?;

    match config.run {
        Role::Consumer => commands::consumer::execute(&config).await,
        Role::Producer => commands::producer::execute(&config).await,
        Role::Standalone => commands::standalone::execute(&config).await,
    }
}

/// Install the global subscriber; RUST_LOG wins over LOG_LEVEL
fn init_logging(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .map_err(|e| anyhow!("invalid log filter '{level}': {e}"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init()
        .map_err(|e| anyhow!("cannot install logger: {e}"))
}
