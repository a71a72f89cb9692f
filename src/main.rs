use anyhow::{Context, Result};
use clap::Parser;
use retailiq::commands::Command;
use retailiq::{apply_cli_overrides, init_tracing, RuntimeConfig};
use std::path::PathBuf;

/// Hive-style partitioned Parquet warehouse for retail analytics
#[derive(Parser)]
#[command(name = "retailiq")]
#[command(version)]
#[command(about = "Hive-style partitioned Parquet warehouse for retail analytics", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Warehouse root directory (overrides config file)
    #[arg(short, long, value_name = "DIR", global = true)]
    warehouse: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error
    #[arg(short = 'v', long, value_name = "LEVEL", global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Step 1: Load base configuration
    let mut config = if let Some(config_path) = &cli.config {
        retailiq_config::load_from_file_path(config_path)
            .with_context(|| format!("Failed to load config from {}", config_path.display()))?
    } else {
        RuntimeConfig::load().context("Failed to load configuration")?
    };

    // Step 2: Apply CLI overrides (highest priority)
    apply_cli_overrides(&mut config, cli.warehouse.as_deref(), cli.log_level.as_deref());
    config.validate()?;

    init_tracing(&config);

    cli.command.run(&config)
}
