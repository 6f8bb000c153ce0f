//! Common test utilities.
//!
//! This module contains shared helpers for integration tests.
//! Import with `mod common;` in test files.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use steward::control::accessor::MetadataAccessor;
use steward::control::api::{Acknowledgment, Instruction, LiveInstance, ObservedState, SessionId};
use steward::control::state_model::StateModelDefinition;
use steward::control::store::{InMemoryStore, MetadataStore};
use steward::core::config::{ClusterConfig, ResourceConfig};
use steward::core::runtime::seed_cluster;
use steward::ops::observability::ControllerMetrics;
use steward::pipeline::dispatch::TransitionDispatcher;
use steward::pipeline::event::{ClusterEvent, TriggerKind, INSTRUCTION_PLAN};
use steward::pipeline::executor::{Pipeline, RunOutcome};
use steward::pipeline::reconcile::InstructionPlan;
use steward::pipeline::stage::{PipelineSettings, StageContext};
use tempfile::NamedTempFile;

pub const CLUSTER: &str = "test-cluster";
pub const RESOURCE: &str = "testResource";
pub const CONTROLLER_VERSION: &str = "1.2.0";

/// Instance names `localhost_12918`, `localhost_12919`, ...
pub fn instance_names(count: usize) -> Vec<String> {
    (0..count).map(|i| format!("localhost_{}", 12918 + i)).collect()
}

/// A one-resource cluster definition.
pub fn cluster_config(instances: usize, partitions: usize, replicas: usize, state_model: &str) -> ClusterConfig {
    ClusterConfig {
        name: CLUSTER.to_string(),
        instances: instance_names(instances),
        resources: vec![ResourceConfig {
            name: RESOURCE.to_string(),
            partitions,
            replicas,
            state_model: state_model.to_string(),
        }],
    }
}

/// Pipeline settings with a fixed controller version.
pub fn settings() -> PipelineSettings {
    PipelineSettings {
        controller_version: Some(CONTROLLER_VERSION.to_string()),
        dispatch_parallelism: 2,
        ..PipelineSettings::default()
    }
}

/// A seeded in-memory cluster plus a simulated participant fleet.
pub struct TestCluster {
    pub store: Arc<InMemoryStore>,
    pub accessor: MetadataAccessor,
    pub metrics: Arc<ControllerMetrics>,
    pub settings: PipelineSettings,
    sessions: BTreeMap<String, SessionId>,
}

impl TestCluster {
    /// Seed `config` into a fresh store. Nobody is connected yet.
    pub fn new(config: &ClusterConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let accessor = MetadataAccessor::new(store.clone() as Arc<dyn MetadataStore>, config.name.clone());
        seed_cluster(&accessor, config).expect("seed cluster");
        Self {
            store,
            accessor,
            metrics: Arc::new(ControllerMetrics::new()),
            settings: settings(),
            sessions: BTreeMap::new(),
        }
    }

    /// Seed `config` and connect every instance at the controller's version.
    pub fn connected(config: &ClusterConfig) -> Self {
        let mut cluster = Self::new(config);
        for instance in &config.instances {
            cluster.connect(instance, Some(CONTROLLER_VERSION));
        }
        cluster
    }

    /// Connect `instance` under a fresh session.
    pub fn connect(&mut self, instance: &str, version: Option<&str>) -> SessionId {
        let session = SessionId::generate();
        let mut live = LiveInstance::new(instance, session.clone());
        live.version = version.map(String::from);
        self.accessor.put_live_instance(&live).expect("put live instance");
        self.sessions.insert(instance.to_string(), session.clone());
        session
    }

    /// Drop `instance`'s live record.
    pub fn disconnect(&mut self, instance: &str) {
        self.accessor.remove_live_instance(instance).expect("remove live instance");
        self.sessions.remove(instance);
    }

    pub fn session(&self, instance: &str) -> SessionId {
        self.sessions[instance].clone()
    }

    pub fn context(&self) -> StageContext {
        StageContext::new(self.accessor.clone(), self.settings.clone(), self.metrics.clone())
    }

    pub fn pipeline(&self) -> Pipeline {
        Pipeline::standard(self.context())
    }

    pub fn dispatcher(&self) -> TransitionDispatcher {
        TransitionDispatcher::new(self.accessor.clone(), self.settings.dispatch_parallelism, self.metrics.clone())
    }

    /// One pipeline run. Returns the outcome and the finished event.
    pub fn run(&self) -> (RunOutcome, ClusterEvent) {
        let mut event = ClusterEvent::new(CLUSTER, TriggerKind::ConfigChange);
        let outcome = self.pipeline().run(&mut event);
        (outcome, event)
    }

    /// One pipeline run that must complete. Returns its plan.
    pub fn run_plan(&self) -> InstructionPlan {
        let (outcome, mut event) = self.run();
        assert!(outcome.is_completed(), "run aborted: {:?}", outcome);
        event
            .take::<InstructionPlan>(INSTRUCTION_PLAN)
            .expect("plan on completed run")
    }

    /// Every queued instruction for connected instances.
    pub fn queued(&self) -> Vec<Instruction> {
        let mut all = Vec::new();
        for instance in self.sessions.keys() {
            all.extend(self.accessor.instructions(instance).expect("read queue"));
        }
        all.sort_by(|a, b| (&a.instance, &a.partition).cmp(&(&b.instance, &b.partition)));
        all
    }

    /// Apply one instruction the way a participant does: report the new
    /// label, then acknowledge. The move must be legal and every bounded
    /// label must stay within its bound afterwards.
    pub fn apply(&self, instruction: &Instruction) {
        let model = self.state_model(&instruction.state_model);
        assert!(
            model.is_legal(&instruction.from_state, &instruction.to_state),
            "illegal transition planned: {}",
            instruction
        );

        let session = self.session(&instruction.instance);
        let mut observed = self
            .accessor
            .observed_state(&instruction.instance, &instruction.resource)
            .expect("read observed")
            .unwrap_or_else(|| ObservedState::new(&instruction.instance, &instruction.resource));
        observed.set(&instruction.partition, &instruction.to_state, session.clone());
        self.accessor.put_observed_state(&observed).expect("put observed");

        let ack = Acknowledgment {
            instance: instruction.instance.clone(),
            instruction_id: instruction.id,
            session,
        };
        assert!(self.dispatcher().acknowledge(&ack).expect("acknowledge"));
        self.assert_within_bounds();
    }

    /// Apply every queued instruction one at a time. Returns how many.
    pub fn apply_all(&self) -> usize {
        let queued = self.queued();
        for instruction in &queued {
            self.apply(instruction);
        }
        queued.len()
    }

    /// Alternate runs and participant work until a run plans nothing.
    /// Returns the number of runs that produced instructions.
    pub fn converge(&self, max_rounds: usize) -> usize {
        for round in 0..max_rounds {
            let plan = self.run_plan();
            if plan.instructions.is_empty() && self.queued().is_empty() {
                return round;
            }
            self.apply_all();
        }
        panic!("cluster did not converge in {} rounds", max_rounds);
    }

    /// Label `instance` reports for a partition under its current session.
    pub fn observed(&self, instance: &str, partition: &str) -> Option<String> {
        let session = self.sessions.get(instance)?;
        self.accessor
            .observed_state(instance, RESOURCE)
            .expect("read observed")?
            .get(partition)
            .filter(|e| &e.session == session)
            .map(|e| e.state.clone())
    }

    /// Connected instances reporting `state` for a partition.
    pub fn holders(&self, partition: &str, state: &str) -> Vec<String> {
        self.sessions
            .keys()
            .filter(|i| self.observed(i, partition).as_deref() == Some(state))
            .cloned()
            .collect()
    }

    /// Stored definition named `name`, else the built-in one.
    pub fn state_model(&self, name: &str) -> StateModelDefinition {
        self.accessor
            .state_models()
            .expect("read state models")
            .into_iter()
            .find(|m| m.name == name)
            .or_else(|| StateModelDefinition::builtin(name))
            .unwrap_or_else(|| panic!("unknown state model {}", name))
    }

    /// Fail if any partition has more holders of a bounded label than the
    /// label's bound allows.
    pub fn assert_within_bounds(&self) {
        let desired = self
            .accessor
            .desired_state(RESOURCE)
            .expect("read desired")
            .expect("desired state");
        let model = self.state_model(&desired.state_model);
        let eligible = self
            .sessions
            .keys()
            .filter(|i| {
                self.accessor
                    .instance_config(i)
                    .expect("read config")
                    .map_or(false, |c| c.enabled)
            })
            .count();

        for partition in desired.partitions() {
            for state in &model.states {
                let Some(bound) = model.bound(state, desired.replicas, eligible) else {
                    continue;
                };
                let holders = self.holders(partition, state);
                assert!(
                    holders.len() <= bound,
                    "{} held by {:?} for {} (bound {})",
                    state,
                    holders,
                    partition,
                    bound
                );
            }
        }
    }
}

/// Write `content` to a temp config file.
pub fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(content.as_bytes()).expect("Failed to write config");
    file
}

/// A small valid configuration file.
pub fn create_minimal_config() -> NamedTempFile {
    write_config(
        r#"
[controller]
name = "steward-test"
version = "1.2.0"
rebalance_interval_ms = 0

[[clusters]]
name = "test-cluster"
instances = ["localhost_12918", "localhost_12919", "localhost_12920"]

[[clusters.resources]]
name = "testResource"
partitions = 4
replicas = 2
state_model = "MasterSlave"
"#,
    )
}
