//! CLI module - Command line interface definitions and handlers

pub mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

/// Jobot - Interruptible job-listing extraction
///
/// Inspects the configured searches and filters, dry-runs filters against
/// saved records, and lists records waiting in fallback files.
#[derive(Parser, Debug)]
#[command(name = "jobot")]
#[command(version)]
#[command(about = "Job-listing extraction with filtered, exactly-once persistence", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Config file (default: platform config dir, then ./jobot.toml)
    #[arg(long, short, global = true, env = "JOBOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Verbose output (debug logging)
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Output format for machine parsing
    #[arg(long, value_enum, global = true, default_value = "human")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Validate the config and show sessions, searches and filters
    Check(CheckArgs),

    /// Run the configured filters over a JSON array of records
    Filter(FilterArgs),

    /// List records waiting in fallback files
    Pending(PendingArgs),

    /// Print a commented sample config
    SampleConfig,
}

#[derive(Debug, Clone, Parser)]
pub struct CheckArgs {
    /// Only show this session
    #[arg(long, short)]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Parser)]
pub struct FilterArgs {
    /// JSON file holding an array of records
    #[arg(required = true)]
    pub records: PathBuf,

    /// Session the records were extracted for (must exist in the config)
    #[arg(long, short)]
    pub session: Option<String>,
}

#[derive(Debug, Clone, Parser)]
pub struct PendingArgs {
    /// Collection (fallback namespace) to inspect
    #[arg(required = true)]
    pub collection: String,

    /// Fallback root (default: general.fallback_dir from the config)
    #[arg(long)]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human readable (default)
    #[default]
    Human,
    /// JSON output
    Json,
}
