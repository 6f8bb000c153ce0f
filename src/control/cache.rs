//! Per-run snapshot of cluster metadata.
//!
//! A [`ClusterDataCache`] is built once at the start of a pipeline run and is
//! never mutated afterwards. Every later stage reads the same snapshot, so a
//! run is a function of the metadata generation it loaded.
//!
//! # Staleness
//!
//! Liveness is loaded before anything session-scoped. An observed entry or a
//! queued instruction counts only if its session equals the instance's current
//! live session. Stale observed entries are dropped and counted. Stale
//! instructions are kept aside so the dispatch stage can purge them.

use crate::control::accessor::MetadataAccessor;
use crate::control::api::{
    DesiredState, InstanceConfig, Instruction, LiveInstance, SessionId,
};
use crate::control::state_model::StateModelDefinition;
use crate::core::error::StewardResult;
use std::collections::{BTreeMap, BTreeSet};

type PartitionKey = (String, String, String);

/// Immutable snapshot of one cluster's metadata.
#[derive(Debug, Clone, Default)]
pub struct ClusterDataCache {
    cluster: String,

    /// Resource name to desired state, preference lists restricted to known instances.
    desired_states: BTreeMap<String, DesiredState>,

    /// Connected instances.
    live_instances: BTreeMap<String, LiveInstance>,

    /// Configured instances.
    instance_configs: BTreeMap<String, InstanceConfig>,

    /// Instance -> resource -> partition -> label, current sessions only.
    observed: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,

    /// Outstanding instructions under the target's current session.
    pending: BTreeMap<PartitionKey, Instruction>,

    /// Instructions whose session no longer matches, or whose target is gone.
    stale_instructions: Vec<Instruction>,

    /// Instance -> resource -> partitions marked in error.
    error_markers: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,

    state_models: BTreeMap<String, StateModelDefinition>,

    stale_observed: usize,
}

impl ClusterDataCache {
    /// Read every record the pipeline needs for `accessor`'s cluster.
    ///
    /// Store failures surface as `MetadataUnavailable` and nothing is written.
    pub fn load(accessor: &MetadataAccessor) -> StewardResult<Self> {
        let mut cache = Self {
            cluster: accessor.cluster().to_string(),
            ..Self::default()
        };

        cache.load_state_models(accessor)?;

        for config in accessor.instance_configs()? {
            cache.instance_configs.insert(config.instance.clone(), config);
        }

        // Liveness first: everything session-scoped below is judged against it.
        for live in accessor.live_instances()? {
            cache.live_instances.insert(live.instance.clone(), live);
        }

        cache.load_desired_states(accessor)?;

        let instances: BTreeSet<String> = cache
            .instance_configs
            .keys()
            .chain(cache.live_instances.keys())
            .cloned()
            .collect();

        for instance in &instances {
            cache.load_observed(accessor, instance)?;
            cache.load_instructions(accessor, instance)?;
            for markers in accessor.error_markers(instance)? {
                if !markers.partitions.is_empty() {
                    cache
                        .error_markers
                        .entry(instance.clone())
                        .or_default()
                        .insert(markers.resource, markers.partitions);
                }
            }
        }

        tracing::debug!(
            cluster = %cache.cluster,
            resources = cache.desired_states.len(),
            live = cache.live_instances.len(),
            configured = cache.instance_configs.len(),
            pending = cache.pending.len(),
            stale_observed = cache.stale_observed,
            stale_instructions = cache.stale_instructions.len(),
            "cluster snapshot loaded"
        );

        Ok(cache)
    }

    fn load_state_models(&mut self, accessor: &MetadataAccessor) -> StewardResult<()> {
        for model in StateModelDefinition::builtins() {
            self.state_models.insert(model.name.clone(), model);
        }
        // Stored definitions override built-ins of the same name.
        for model in accessor.state_models()? {
            match model.validate() {
                Ok(()) => {
                    self.state_models.insert(model.name.clone(), model);
                }
                Err(e) => {
                    tracing::warn!(
                        cluster = %accessor.cluster(),
                        state_model = %model.name,
                        error = %e,
                        "ignoring invalid state model definition"
                    );
                }
            }
        }
        Ok(())
    }

    fn load_desired_states(&mut self, accessor: &MetadataAccessor) -> StewardResult<()> {
        for mut desired in accessor.desired_states()? {
            for (partition, preference) in desired.preference_lists.iter_mut() {
                let before = preference.len();
                preference.retain(|instance| self.instance_configs.contains_key(instance));
                if preference.len() != before {
                    tracing::warn!(
                        cluster = %self.cluster,
                        resource = %desired.resource,
                        partition = %partition,
                        dropped = before - preference.len(),
                        "preference list names unconfigured instances"
                    );
                }
            }
            self.desired_states.insert(desired.resource.clone(), desired);
        }
        Ok(())
    }

    fn load_observed(&mut self, accessor: &MetadataAccessor, instance: &str) -> StewardResult<()> {
        let session = self.live_instances.get(instance).map(|l| l.session.clone());
        for observed in accessor.observed_states(instance)? {
            for (partition, entry) in observed.partitions {
                if session.as_ref() != Some(&entry.session) {
                    self.stale_observed += 1;
                    continue;
                }
                self.observed
                    .entry(instance.to_string())
                    .or_default()
                    .entry(observed.resource.clone())
                    .or_default()
                    .insert(partition, entry.state);
            }
        }
        Ok(())
    }

    fn load_instructions(&mut self, accessor: &MetadataAccessor, instance: &str) -> StewardResult<()> {
        let session = self.live_instances.get(instance).map(|l| l.session.clone());
        let mut instructions = accessor.instructions(instance)?;
        instructions.sort_by_key(|i| i.created_at);
        for instruction in instructions {
            let current = session
                .as_ref()
                .is_some_and(|s| instruction.is_current(s));
            if !current {
                self.stale_instructions.push(instruction);
                continue;
            }
            let key = (
                instruction.instance.clone(),
                instruction.resource.clone(),
                instruction.partition.clone(),
            );
            // Oldest instruction wins; later duplicates wait for it.
            self.pending.entry(key).or_insert(instruction);
        }
        Ok(())
    }

    /// Cluster name.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Desired states in resource order.
    pub fn desired_states(&self) -> impl Iterator<Item = &DesiredState> {
        self.desired_states.values()
    }

    /// Desired state for a resource.
    pub fn desired_state(&self, resource: &str) -> Option<&DesiredState> {
        self.desired_states.get(resource)
    }

    /// Connected instances in name order.
    pub fn live_instances(&self) -> impl Iterator<Item = &LiveInstance> {
        self.live_instances.values()
    }

    /// Live record of an instance.
    pub fn live_instance(&self, instance: &str) -> Option<&LiveInstance> {
        self.live_instances.get(instance)
    }

    /// Check if an instance is connected.
    pub fn is_live(&self, instance: &str) -> bool {
        self.live_instances.contains_key(instance)
    }

    /// Current session of a connected instance.
    pub fn session_of(&self, instance: &str) -> Option<&SessionId> {
        self.live_instances.get(instance).map(|l| &l.session)
    }

    /// Configured instances in name order.
    pub fn instance_configs(&self) -> impl Iterator<Item = &InstanceConfig> {
        self.instance_configs.values()
    }

    /// Config of an instance.
    pub fn instance_config(&self, instance: &str) -> Option<&InstanceConfig> {
        self.instance_configs.get(instance)
    }

    /// Current label of a partition on an instance, if reported under its live session.
    pub fn observed_state(&self, instance: &str, resource: &str, partition: &str) -> Option<&str> {
        self.observed
            .get(instance)?
            .get(resource)?
            .get(partition)
            .map(String::as_str)
    }

    /// Every `(instance, label)` currently reported for a partition.
    pub fn observed_holders(&self, resource: &str, partition: &str) -> Vec<(&str, &str)> {
        self.observed
            .iter()
            .filter_map(|(instance, resources)| {
                resources
                    .get(resource)?
                    .get(partition)
                    .map(|state| (instance.as_str(), state.as_str()))
            })
            .collect()
    }

    /// Partitions of a resource reported by any live instance.
    pub fn observed_partitions(&self, resource: &str) -> BTreeSet<&str> {
        self.observed
            .values()
            .filter_map(|resources| resources.get(resource))
            .flat_map(|partitions| partitions.keys().map(String::as_str))
            .collect()
    }

    /// Outstanding instruction for a partition on an instance.
    pub fn pending_instruction(&self, instance: &str, resource: &str, partition: &str) -> Option<&Instruction> {
        self.pending
            .get(&(instance.to_string(), resource.to_string(), partition.to_string()))
    }

    /// Outstanding instructions under current sessions.
    pub fn pending_instructions(&self) -> impl Iterator<Item = &Instruction> {
        self.pending.values()
    }

    /// Queued instructions that must be purged.
    pub fn stale_instructions(&self) -> &[Instruction] {
        &self.stale_instructions
    }

    /// Check if a partition on an instance carries an error marker.
    pub fn has_error_marker(&self, instance: &str, resource: &str, partition: &str) -> bool {
        self.error_markers
            .get(instance)
            .and_then(|r| r.get(resource))
            .is_some_and(|p| p.contains(partition))
    }

    /// Marked partitions of one resource on one instance.
    pub fn error_markers(&self, instance: &str, resource: &str) -> Option<&BTreeSet<String>> {
        self.error_markers.get(instance)?.get(resource)
    }

    /// State model by name.
    pub fn state_model(&self, name: &str) -> Option<&StateModelDefinition> {
        self.state_models.get(name)
    }

    /// Number of observed entries dropped for a stale session.
    pub fn stale_observed_count(&self) -> usize {
        self.stale_observed
    }
}
