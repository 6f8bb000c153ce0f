//! Command-line interface.
//!
//! Unified CLI for Steward operations.

pub mod commands;

use clap::{Parser, Subcommand};

/// Steward - cluster-management control plane.
#[derive(Parser, Debug)]
#[command(name = "steward")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path.
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start the controller.
    Start(commands::StartArgs),
    /// Configuration operations.
    Config(commands::ConfigArgs),
    /// Compute one reconciliation plan per configured cluster and print it.
    Plan(commands::PlanArgs),
}
