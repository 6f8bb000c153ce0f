//! Steward - unified CLI entrypoint.
//!
//! Usage:
//!   steward start --config config/steward.toml
//!   steward plan --config config/steward.toml [--cluster NAME] [--format json]
//!   steward config validate --config config/steward.toml

use anyhow::Result;
use clap::Parser;
use steward::cli::commands::{run_config, run_plan, run_start_with_config};
use steward::cli::{Cli, Commands};
use std::path::PathBuf;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Determine config path - use global --config or default
    let config_path = cli
        .config
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config/steward.toml"));

    match cli.command {
        Commands::Start(args) => {
            let overrides = args.overrides(cli.log_level);
            run_start_with_config(&config_path, &overrides).await
        }
        Commands::Config(args) => run_config(args),
        Commands::Plan(args) => run_plan(&config_path, cli.log_level, args),
    }
}
