//! Config command implementation.

use crate::core::config::Config;
use anyhow::Result;
use clap::{Args, Subcommand};
use std::path::{Path, PathBuf};

/// Configuration operations.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Validate configuration file.
    Validate {
        /// Config file path.
        #[arg(short, long, default_value = "config/steward.toml")]
        config: PathBuf,
    },
    /// Print configuration with defaults.
    Show {
        /// Config file path.
        #[arg(short, long, default_value = "config/steward.toml")]
        config: PathBuf,
        /// Output format (toml, json).
        #[arg(long, default_value = "toml")]
        format: String,
    },
    /// Generate a configuration template.
    Generate {
        /// Output file path.
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Environment (dev, prod).
        #[arg(long, default_value = "dev")]
        env: String,
    },
}

/// Run the config command.
pub fn run_config(args: ConfigArgs) -> Result<()> {
    match args.command {
        ConfigCommand::Validate { config } => validate_config(&config),
        ConfigCommand::Show { config, format } => show_config(&config, &format),
        ConfigCommand::Generate { output, env } => generate_config(output.as_deref(), &env),
    }
}

fn validate_config(path: &Path) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let config = Config::from_file(path)?;
    println!("✓ Config file is valid");
    println!(
        "  controller {} (version {})",
        config.controller.name,
        config.controller.effective_version()
    );
    if config.clusters.is_empty() {
        println!("  ⚠ Warning: no [[clusters]] defined, the controller will be idle");
    }
    for cluster in &config.clusters {
        println!(
            "  cluster {}: {} instance(s), {} resource(s)",
            cluster.name,
            cluster.instances.len(),
            cluster.resources.len()
        );
        for resource in &cluster.resources {
            if resource.replicas > cluster.instances.len() {
                println!(
                    "  ⚠ Warning: {}.{} wants {} replicas but only {} instance(s) are configured",
                    cluster.name,
                    resource.name,
                    resource.replicas,
                    cluster.instances.len()
                );
            }
        }
    }
    Ok(())
}

fn show_config(path: &Path, format: &str) -> Result<()> {
    if !path.exists() {
        anyhow::bail!("Config file not found: {:?}", path);
    }

    let config = Config::from_file(path)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&config)?),
        _ => println!("{}", config.to_toml()?),
    }
    Ok(())
}

fn generate_config(output: Option<&Path>, env: &str) -> Result<()> {
    let template = match env {
        "prod" | "production" => generate_prod_template(),
        _ => generate_dev_template(),
    };

    match output {
        Some(path) => {
            std::fs::write(path, &template)?;
            println!("Generated {} config template: {:?}", env, path);
        }
        None => {
            println!("{}", template);
        }
    }

    Ok(())
}

fn generate_dev_template() -> String {
    r#"# Steward Development Configuration

[controller]
name = "steward-dev"
rebalance_interval_ms = 5000

[pipeline]
dispatch_parallelism = 2
leader_tie_break = "preference_order"

[telemetry]
log_level = "debug"

[[clusters]]
name = "dev-cluster"
instances = ["localhost_12918", "localhost_12919", "localhost_12920"]

[[clusters.resources]]
name = "testResource"
partitions = 6
replicas = 2
state_model = "MasterSlave"
"#
    .to_string()
}

fn generate_prod_template() -> String {
    r#"# Steward Production Configuration

[controller]
name = "steward-1"
rebalance_interval_ms = 30000

[pipeline]
dispatch_parallelism = 8
leader_tie_break = "sticky_current_holder"

[telemetry]
log_level = "info"

[audit]
enabled = true
buffer_size = 10000

[[clusters]]
name = "prod-cluster"
instances = ["node-1_12918", "node-2_12918", "node-3_12918", "node-4_12918", "node-5_12918"]

[[clusters.resources]]
name = "orders"
partitions = 64
replicas = 3
state_model = "MasterSlave"

[[clusters.resources]]
name = "sessions"
partitions = 16
replicas = 2
state_model = "OnlineOffline"
"#
    .to_string()
}
