//! # Sensor Hub CLI
//!
//! Command-line entry point.
//!
//! Provides:
//! - Configuration loading and `--show-settings`
//! - Logging and metrics initialisation
//! - Supervisor lifecycle and graceful shutdown on SIGINT/SIGTERM

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

use cli::Cli;
use commands::{run_hub, show_settings};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let cli = Cli::parse();

    if cli.show_settings {
        return show_settings(&cli.config_file, cli.json);
    }

    let result = run_hub(&cli).await;
    if let Err(ref e) = result {
        tracing::error!(error = %e, "sensor hub failed");
    }
    result
}
