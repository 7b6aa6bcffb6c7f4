use std::path::PathBuf;

use anyhow::{Context, Result};
use chatgate::load_config;
use clap::{Parser, Subcommand};
use tracing::{error, info};

mod cli;

use crate::cli::{
    cmd_check, cmd_permissions, cmd_simulate, init_logging, CheckArgs, OutputFormat,
    SimulateArgs,
};

/// chatgate - permission-gated channel edits that respect the name/topic rate limit
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (overrides the configured one)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable debug mode
    #[arg(short, long)]
    debug: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "human")]
    output: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate an overwrite list for one principal
    Check(CheckArgs),

    /// Issue rapid name edits against an in-memory channel and run drain ticks
    Simulate(SimulateArgs),

    /// List known permission names and their bits
    Permissions,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Configuration first so its log level can seed the subscriber
    let loaded = load_config(cli.config.as_deref())
        .await
        .context("Failed to load configuration")?;
    let level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| loaded.config.log_level.clone());
    init_logging(&level, cli.debug)?;

    info!("Starting chatgate v{}", env!("CARGO_PKG_VERSION"));
    if let Some(path) = &loaded.path {
        info!("Using configuration from: {}", path.display());
    }

    let result = match cli.command {
        Commands::Check(args) => cmd_check(args, cli.output).await,
        Commands::Simulate(args) => cmd_simulate(args, &loaded.config, cli.output).await,
        Commands::Permissions => cmd_permissions(cli.output),
    };

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Command failed: {:#}", e);
            std::process::exit(1);
        }
    }
}
