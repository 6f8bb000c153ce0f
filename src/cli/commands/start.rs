//! Start command implementation.

use crate::control::placement::LeaderTieBreak;
use crate::core::config::{Config, ConfigOverrides};
use crate::core::runtime::Runtime;
use anyhow::{Context, Result};
use clap::Args;
use std::path::Path;

/// Start the controller.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Override the version reported to the compatibility check.
    #[arg(long)]
    pub controller_version: Option<String>,

    /// Override the periodic rebalance interval (0 disables it).
    #[arg(long)]
    pub rebalance_interval_ms: Option<u64>,

    /// Override the leader tie-break (preference_order, sticky_current_holder).
    #[arg(long)]
    pub leader_tie_break: Option<LeaderTieBreak>,
}

impl StartArgs {
    /// CLI overrides carried by these arguments.
    pub fn overrides(&self, log_level: Option<String>) -> ConfigOverrides {
        ConfigOverrides {
            log_level,
            controller_version: self.controller_version.clone(),
            rebalance_interval_ms: self.rebalance_interval_ms,
            leader_tie_break: self.leader_tie_break,
        }
    }
}

/// Initialize tracing subscriber if the telemetry feature is enabled.
///
/// `RUST_LOG` wins over the configured level.
#[cfg(feature = "telemetry")]
pub fn init_tracing(level: &str) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init();
}

#[cfg(not(feature = "telemetry"))]
pub fn init_tracing(_level: &str) {}

/// Load, override, and re-validate a config file.
pub(crate) fn load_config(config_path: &Path, overrides: &ConfigOverrides) -> Result<Config> {
    let mut config = Config::from_file(config_path)
        .with_context(|| format!("failed to load config from {:?}", config_path))?;
    config.apply_overrides(overrides);
    config.validate().context("invalid configuration after overrides")?;
    Ok(config)
}

/// Run the start command with the given config path.
pub async fn run_start_with_config(config_path: &Path, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    init_tracing(&config.telemetry.log_level);

    let mut runtime = Runtime::new(config)?;
    runtime.run().await
}
