//! Plan command implementation.
//!
//! Seeds a throwaway store from the config, connects every configured
//! instance, runs one pipeline pass per cluster, and prints what the
//! controller would dispatch.

use super::start::{init_tracing, load_config};
use crate::control::accessor::MetadataAccessor;
use crate::control::api::{LiveInstance, SessionId};
use crate::control::store::{InMemoryStore, MetadataStore};
use crate::core::config::{ClusterConfig, Config, ConfigOverrides};
use crate::core::runtime::seed_cluster;
use crate::ops::observability::ControllerMetrics;
use crate::pipeline::event::{ClusterEvent, TriggerKind, INSTRUCTION_PLAN};
use crate::pipeline::executor::Pipeline;
use crate::pipeline::reconcile::InstructionPlan;
use crate::pipeline::stage::StageContext;
use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

/// Compute one reconciliation plan per configured cluster.
#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Only plan this cluster.
    #[arg(long)]
    pub cluster: Option<String>,

    /// Output format (text, json).
    #[arg(long, default_value = "text")]
    pub format: String,

    /// Version the simulated participants report. Defaults to the controller's.
    #[arg(long)]
    pub participant_version: Option<String>,
}

/// Result of planning one cluster.
#[derive(Debug, Serialize)]
pub struct ClusterPlan {
    pub cluster: String,
    pub completed: bool,
    pub error: Option<String>,
    pub plan: Option<InstructionPlan>,
}

/// Run the plan command.
pub fn run_plan(config_path: &Path, log_level: Option<String>, args: PlanArgs) -> Result<()> {
    let overrides = ConfigOverrides {
        log_level,
        ..Default::default()
    };
    let config = load_config(config_path, &overrides)?;
    init_tracing(&config.telemetry.log_level);

    let clusters: Vec<&ClusterConfig> = config
        .clusters
        .iter()
        .filter(|c| args.cluster.as_deref().map_or(true, |name| name == c.name))
        .collect();
    if clusters.is_empty() {
        anyhow::bail!("no matching cluster in {:?}", config_path);
    }

    let mut plans = Vec::new();
    for cluster in clusters {
        plans.push(plan_cluster(&config, cluster, args.participant_version.as_deref())?);
    }

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&plans)?),
        _ => print_text(&plans),
    }
    Ok(())
}

/// Plan one cluster against a freshly seeded store with every instance live.
pub fn plan_cluster(
    config: &Config,
    cluster: &ClusterConfig,
    participant_version: Option<&str>,
) -> Result<ClusterPlan> {
    let store: Arc<dyn MetadataStore> = Arc::new(InMemoryStore::new());
    let accessor = MetadataAccessor::new(store, cluster.name.clone());
    seed_cluster(&accessor, cluster)
        .with_context(|| format!("failed to seed cluster {}", cluster.name))?;

    let version = participant_version
        .map(String::from)
        .unwrap_or_else(|| config.controller.effective_version());
    for instance in &cluster.instances {
        let live = LiveInstance::new(instance.clone(), SessionId::generate()).with_version(version.clone());
        accessor.put_live_instance(&live)?;
    }

    let context = StageContext::new(
        accessor,
        config.pipeline_settings(),
        Arc::new(ControllerMetrics::new()),
    );
    let mut pipeline = Pipeline::standard(context);
    let mut event = ClusterEvent::new(cluster.name.clone(), TriggerKind::ConfigChange);
    let outcome = pipeline.run(&mut event);

    Ok(ClusterPlan {
        cluster: cluster.name.clone(),
        completed: outcome.is_completed(),
        error: outcome.error().map(|e| e.to_string()),
        plan: event.take::<InstructionPlan>(INSTRUCTION_PLAN),
    })
}

fn print_text(plans: &[ClusterPlan]) {
    for cluster in plans {
        println!("cluster {}", cluster.cluster);
        if let Some(ref error) = cluster.error {
            println!("  ✗ run aborted: {}", error);
        }
        let Some(ref plan) = cluster.plan else {
            continue;
        };
        for instruction in &plan.instructions {
            println!("  {}", instruction);
        }
        for stuck in &plan.stuck {
            println!(
                "  ⚠ stuck: {} {}/{}: {} -> {}",
                stuck.instance, stuck.resource, stuck.partition, stuck.from_state, stuck.to_state
            );
        }
        println!(
            "  {} instruction(s), {} deferred, {} stuck",
            plan.instructions.len(),
            plan.deferred.len(),
            plan.stuck.len()
        );
    }
}
