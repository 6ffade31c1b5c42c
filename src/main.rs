//! Jobot - Interruptible job-listing extraction
//!
//! Command-line front end over the library: validates configuration,
//! dry-runs keyword filters and inspects fallback files.

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use jobot::cli::{commands, Cli, Commands};
use jobot::{generate_sample_config, Config};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug"
    } else {
        config.general.log_level.as_str()
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::from_default_env().add_directive(format!("jobot={}", level).parse()?))
        .init();

    match cli.command {
        Commands::Check(args) => commands::run_check(&config, &args, cli.output)?,
        Commands::Filter(args) => commands::run_filter(&config, &args, cli.output)?,
        Commands::Pending(args) => commands::run_pending(&config, &args, cli.output).await?,
        Commands::SampleConfig => print!("{}", generate_sample_config()),
    }

    Ok(())
}
