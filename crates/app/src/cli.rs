//! CLI argument definitions using clap

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// LedgerLens - classify bank transactions by type and category
#[derive(Parser)]
#[command(name = "ledgerlens")]
#[command(about = "Hybrid transaction type and category classifier", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Configuration file (TOML). Defaults to config.toml in the data directory
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding the category model, overriding the configuration
    #[arg(long, global = true)]
    pub model_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve type and category for every row of a CSV file
    Classify {
        /// Input CSV with merchant, description, amount, ... columns
        #[arg(short, long)]
        input: PathBuf,

        /// Output CSV (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Train the category model on labelled rows and save it
    Train {
        /// Input CSV; rows need a category column
        #[arg(short, long)]
        input: PathBuf,
    },

    /// Show model statistics
    Stats,
}
