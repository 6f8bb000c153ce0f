//! Configuration parsing and validation.
//!
//! Steward configuration is loaded from TOML files with CLI overrides.
//! Sections follow the controller's components: the controller process, the
//! reconciliation pipeline, telemetry, audit, and the clusters bootstrapped
//! into the embedded metadata store.

use crate::control::placement::LeaderTieBreak;
use crate::control::state_model::StateModelDefinition;
use crate::ops::audit::AuditLogConfig;
use crate::ops::version::VersionInfo;
use crate::pipeline::stage::PipelineSettings;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Top-level Steward configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Controller process configuration.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Reconciliation pipeline tunables.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Telemetry and observability configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,

    /// Audit log configuration.
    #[serde(default)]
    pub audit: AuditConfig,

    /// Clusters to bootstrap and manage.
    #[serde(default)]
    pub clusters: Vec<ClusterConfig>,
}

/// Controller process configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerConfig {
    /// Controller instance name.
    #[serde(default = "default_controller_name")]
    pub name: String,

    /// Version reported to the compatibility check. Defaults to the build version.
    #[serde(default)]
    pub version: Option<String>,

    /// Periodic rebalance interval in milliseconds. Zero disables it.
    #[serde(default = "default_rebalance_interval_ms")]
    pub rebalance_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            name: default_controller_name(),
            version: None,
            rebalance_interval_ms: default_rebalance_interval_ms(),
        }
    }
}

impl ControllerConfig {
    /// Version the controller reports.
    pub fn effective_version(&self) -> String {
        self.version
            .clone()
            .unwrap_or_else(|| VersionInfo::current().semver())
    }
}

/// Reconciliation pipeline configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum instance queues written concurrently during dispatch.
    #[serde(default = "default_dispatch_parallelism")]
    pub dispatch_parallelism: usize,

    /// Which eligible instance takes a partition's top state.
    #[serde(default)]
    pub leader_tie_break: LeaderTieBreak,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dispatch_parallelism: default_dispatch_parallelism(),
            leader_tie_break: LeaderTieBreak::default(),
        }
    }
}

/// Telemetry and observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
        }
    }
}

/// Audit log configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditConfig {
    /// Record administrative commands.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Events kept in memory.
    #[serde(default = "default_audit_buffer_size")]
    pub buffer_size: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: default_audit_buffer_size(),
        }
    }
}

impl From<&AuditConfig> for AuditLogConfig {
    fn from(config: &AuditConfig) -> Self {
        AuditLogConfig {
            enabled: config.enabled,
            buffer_size: config.buffer_size,
        }
    }
}

/// A cluster bootstrapped into the embedded metadata store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Cluster name.
    pub name: String,

    /// Participant instance names.
    #[serde(default)]
    pub instances: Vec<String>,

    /// Resources and their placement.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
}

/// A resource's placement parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Resource name.
    pub name: String,

    /// Number of partitions.
    pub partitions: usize,

    /// Replicas per partition.
    #[serde(default = "default_replicas")]
    pub replicas: usize,

    /// State model name.
    #[serde(default = "default_state_model")]
    pub state_model: String,
}

// Default value functions

fn default_controller_name() -> String {
    "steward-controller".to_string()
}

fn default_rebalance_interval_ms() -> u64 {
    30_000
}

fn default_dispatch_parallelism() -> usize {
    4
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_true() -> bool {
    true
}

fn default_audit_buffer_size() -> usize {
    1_000
}

fn default_replicas() -> usize {
    1
}

fn default_state_model() -> String {
    crate::control::state_model::MASTER_SLAVE.to_string()
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let config: Config =
            toml::from_str(&content).with_context(|| "failed to parse config file")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content).with_context(|| "failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply CLI overrides to the configuration.
    pub fn apply_overrides(&mut self, overrides: &ConfigOverrides) {
        if let Some(ref log_level) = overrides.log_level {
            self.telemetry.log_level = log_level.clone();
        }
        if let Some(ref version) = overrides.controller_version {
            self.controller.version = Some(version.clone());
        }
        if let Some(interval) = overrides.rebalance_interval_ms {
            self.controller.rebalance_interval_ms = interval;
        }
        if let Some(tie_break) = overrides.leader_tie_break {
            self.pipeline.leader_tie_break = tie_break;
        }
    }

    /// Pipeline settings derived from this configuration.
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            controller_version: Some(self.controller.effective_version()),
            dispatch_parallelism: self.pipeline.dispatch_parallelism,
            leader_tie_break: self.pipeline.leader_tie_break,
        }
    }

    /// Validate configuration consistency.
    pub fn validate(&self) -> Result<()> {
        self.validate_controller()?;
        self.validate_pipeline()?;
        self.validate_telemetry()?;
        self.validate_audit()?;
        self.validate_clusters()?;
        Ok(())
    }

    fn validate_controller(&self) -> Result<()> {
        if self.controller.name.trim().is_empty() {
            anyhow::bail!("controller.name must not be empty");
        }
        if let Some(ref version) = self.controller.version {
            if VersionInfo::parse(version).is_none() {
                anyhow::bail!(
                    "controller.version must be major.minor.patch, got: {}",
                    version
                );
            }
        }
        Ok(())
    }

    fn validate_pipeline(&self) -> Result<()> {
        if self.pipeline.dispatch_parallelism == 0 {
            anyhow::bail!("pipeline.dispatch_parallelism must be > 0");
        }
        Ok(())
    }

    fn validate_telemetry(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.telemetry.log_level.as_str()) {
            anyhow::bail!(
                "telemetry.log_level must be one of {:?}, got: {}",
                valid_levels,
                self.telemetry.log_level
            );
        }
        Ok(())
    }

    fn validate_audit(&self) -> Result<()> {
        if self.audit.enabled && self.audit.buffer_size == 0 {
            anyhow::bail!("audit.buffer_size must be > 0 when audit is enabled");
        }
        Ok(())
    }

    fn validate_clusters(&self) -> Result<()> {
        let mut names = HashSet::new();
        for cluster in &self.clusters {
            if cluster.name.trim().is_empty() || cluster.name.contains('/') {
                anyhow::bail!("cluster name must be non-empty and contain no '/': {:?}", cluster.name);
            }
            if !names.insert(cluster.name.as_str()) {
                anyhow::bail!("duplicate cluster: {}", cluster.name);
            }

            let mut instances = HashSet::new();
            for instance in &cluster.instances {
                if instance.trim().is_empty() || instance.contains('/') {
                    anyhow::bail!(
                        "clusters.{}: instance name must be non-empty and contain no '/': {:?}",
                        cluster.name,
                        instance
                    );
                }
                if !instances.insert(instance.as_str()) {
                    anyhow::bail!("clusters.{}: duplicate instance {}", cluster.name, instance);
                }
            }

            let mut resources = HashSet::new();
            for resource in &cluster.resources {
                if !resources.insert(resource.name.as_str()) {
                    anyhow::bail!("clusters.{}: duplicate resource {}", cluster.name, resource.name);
                }
                if resource.name.trim().is_empty() || resource.name.contains('/') {
                    anyhow::bail!(
                        "clusters.{}: resource name must be non-empty and contain no '/'",
                        cluster.name
                    );
                }
                if resource.partitions == 0 {
                    anyhow::bail!(
                        "clusters.{}.{}: partitions must be > 0",
                        cluster.name,
                        resource.name
                    );
                }
                if resource.replicas == 0 {
                    anyhow::bail!(
                        "clusters.{}.{}: replicas must be > 0",
                        cluster.name,
                        resource.name
                    );
                }
                if StateModelDefinition::builtin(&resource.state_model).is_none() {
                    anyhow::bail!(
                        "clusters.{}.{}: unknown state model {}",
                        cluster.name,
                        resource.name,
                        resource.state_model
                    );
                }
            }
        }
        Ok(())
    }

    /// Render this configuration as TOML.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("failed to serialize config")
    }
}

/// CLI override options that can be applied to configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Override log level.
    pub log_level: Option<String>,
    /// Override the reported controller version.
    pub controller_version: Option<String>,
    /// Override the rebalance interval.
    pub rebalance_interval_ms: Option<u64>,
    /// Override the leader tie-break policy.
    pub leader_tie_break: Option<LeaderTieBreak>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.controller.rebalance_interval_ms, 30_000);
        assert_eq!(config.pipeline.dispatch_parallelism, 4);
        assert_eq!(config.pipeline.leader_tie_break, LeaderTieBreak::PreferenceOrder);
        assert!(config.clusters.is_empty());
    }

    #[test]
    fn unknown_state_model_is_rejected() {
        let toml = r#"
[[clusters]]
name = "c"
instances = ["a"]
[[clusters.resources]]
name = "db"
partitions = 2
state_model = "Bogus"
"#;
        let err = Config::from_toml(toml).unwrap_err();
        assert!(format!("{:#}", err).contains("unknown state model"));
    }
}
