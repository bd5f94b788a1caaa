//! LedgerLens CLI
//!
//! Usage:
//!   ledgerlens classify --input tx.csv [--output out.csv]
//!   ledgerlens train --input labelled.csv
//!   ledgerlens stats

mod cli;
mod commands;


use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use cli::*;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact().with_writer(std::io::stderr))
        .init();

    let config = commands::load_config(cli.config.as_deref(), cli.model_dir.as_deref())?;

    match cli.command {
        Commands::Classify { input, output } => {
            commands::cmd_classify(&config, &input, output.as_deref()).await
        }
        Commands::Train { input } => commands::cmd_train(&config, &input).await,
        Commands::Stats => commands::cmd_stats(&config),
    }
}
