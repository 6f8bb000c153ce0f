//! Typed access to a cluster's metadata records.
//!
//! Record layout under a cluster root:
//!
//! ```text
//! /{cluster}/IDEALSTATES/{resource}
//! /{cluster}/LIVEINSTANCES/{instance}
//! /{cluster}/CONFIGS/PARTICIPANT/{instance}
//! /{cluster}/INSTANCES/{instance}/CURRENTSTATES/{resource}
//! /{cluster}/INSTANCES/{instance}/MESSAGES/{instruction-id}
//! /{cluster}/INSTANCES/{instance}/ERRORS/{resource}
//! /{cluster}/STATEMODELDEFS/{state-model}
//! ```
//!
//! Records are JSON encoded.

use crate::control::api::{
    DesiredState, ErrorMarkers, InstanceConfig, Instruction, LiveInstance, ObservedState,
};
use crate::control::state_model::StateModelDefinition;
use crate::control::store::MetadataStore;
use crate::core::error::{StewardError, StewardResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// Path builder for one cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyKey {
    cluster: String,
}

impl PropertyKey {
    pub fn new(cluster: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
        }
    }

    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    pub fn desired_states(&self) -> String {
        format!("/{}/IDEALSTATES", self.cluster)
    }

    pub fn desired_state(&self, resource: &str) -> String {
        format!("{}/{}", self.desired_states(), resource)
    }

    pub fn live_instances(&self) -> String {
        format!("/{}/LIVEINSTANCES", self.cluster)
    }

    pub fn live_instance(&self, instance: &str) -> String {
        format!("{}/{}", self.live_instances(), instance)
    }

    pub fn instance_configs(&self) -> String {
        format!("/{}/CONFIGS/PARTICIPANT", self.cluster)
    }

    pub fn instance_config(&self, instance: &str) -> String {
        format!("{}/{}", self.instance_configs(), instance)
    }

    pub fn instance_root(&self, instance: &str) -> String {
        format!("/{}/INSTANCES/{}", self.cluster, instance)
    }

    pub fn observed_states(&self, instance: &str) -> String {
        format!("{}/CURRENTSTATES", self.instance_root(instance))
    }

    pub fn observed_state(&self, instance: &str, resource: &str) -> String {
        format!("{}/{}", self.observed_states(instance), resource)
    }

    pub fn instructions(&self, instance: &str) -> String {
        format!("{}/MESSAGES", self.instance_root(instance))
    }

    pub fn instruction(&self, instance: &str, id: &Uuid) -> String {
        format!("{}/{}", self.instructions(instance), id)
    }

    pub fn error_markers(&self, instance: &str) -> String {
        format!("{}/ERRORS", self.instance_root(instance))
    }

    pub fn error_marker(&self, instance: &str, resource: &str) -> String {
        format!("{}/{}", self.error_markers(instance), resource)
    }

    pub fn state_models(&self) -> String {
        format!("/{}/STATEMODELDEFS", self.cluster)
    }

    pub fn state_model(&self, name: &str) -> String {
        format!("{}/{}", self.state_models(), name)
    }
}

/// Typed reader/writer over a [`MetadataStore`] for one cluster.
#[derive(Clone)]
pub struct MetadataAccessor {
    store: Arc<dyn MetadataStore>,
    keys: PropertyKey,
}

impl MetadataAccessor {
    pub fn new(store: Arc<dyn MetadataStore>, cluster: impl Into<String>) -> Self {
        Self {
            store,
            keys: PropertyKey::new(cluster),
        }
    }

    pub fn cluster(&self) -> &str {
        self.keys.cluster()
    }

    pub fn keys(&self) -> &PropertyKey {
        &self.keys
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    fn read<T: DeserializeOwned>(&self, path: &str) -> StewardResult<Option<T>> {
        match self.store.get(path)? {
            Some(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StewardError::Serialization {
                    path: path.to_string(),
                    message: e.to_string(),
                }
            }),
            None => Ok(None),
        }
    }

    fn write<T: Serialize>(&self, path: &str, value: &T) -> StewardResult<()> {
        let bytes = serde_json::to_vec(value).map_err(|e| StewardError::Serialization {
            path: path.to_string(),
            message: e.to_string(),
        })?;
        self.store.set(path, bytes)
    }

    fn read_children<T: DeserializeOwned>(&self, parent: &str) -> StewardResult<Vec<T>> {
        let mut records = Vec::new();
        for child in self.store.children(parent)? {
            // A child may vanish between listing and reading.
            if let Some(record) = self.read(&format!("{}/{}", parent, child))? {
                records.push(record);
            }
        }
        Ok(records)
    }

    // === Desired state ===

    pub fn desired_states(&self) -> StewardResult<Vec<DesiredState>> {
        self.read_children(&self.keys.desired_states())
    }

    pub fn desired_state(&self, resource: &str) -> StewardResult<Option<DesiredState>> {
        self.read(&self.keys.desired_state(resource))
    }

    pub fn put_desired_state(&self, state: &DesiredState) -> StewardResult<()> {
        self.write(&self.keys.desired_state(&state.resource), state)
    }

    pub fn remove_desired_state(&self, resource: &str) -> StewardResult<bool> {
        self.store.remove(&self.keys.desired_state(resource))
    }

    // === Liveness ===

    pub fn live_instances(&self) -> StewardResult<Vec<LiveInstance>> {
        self.read_children(&self.keys.live_instances())
    }

    pub fn live_instance(&self, instance: &str) -> StewardResult<Option<LiveInstance>> {
        self.read(&self.keys.live_instance(instance))
    }

    pub fn put_live_instance(&self, live: &LiveInstance) -> StewardResult<()> {
        self.write(&self.keys.live_instance(&live.instance), live)
    }

    /// Drop the live record, as the store does when a participant disconnects.
    pub fn remove_live_instance(&self, instance: &str) -> StewardResult<bool> {
        self.store.remove(&self.keys.live_instance(instance))
    }

    // === Instance config ===

    pub fn instance_configs(&self) -> StewardResult<Vec<InstanceConfig>> {
        self.read_children(&self.keys.instance_configs())
    }

    pub fn instance_config(&self, instance: &str) -> StewardResult<Option<InstanceConfig>> {
        self.read(&self.keys.instance_config(instance))
    }

    pub fn put_instance_config(&self, config: &InstanceConfig) -> StewardResult<()> {
        self.write(&self.keys.instance_config(&config.instance), config)
    }

    /// Read-modify-write an existing instance config.
    pub fn update_instance_config<F>(&self, instance: &str, update: F) -> StewardResult<InstanceConfig>
    where
        F: FnOnce(&mut InstanceConfig),
    {
        let mut config =
            self.instance_config(instance)?
                .ok_or_else(|| StewardError::InstanceNotFound {
                    cluster: self.cluster().to_string(),
                    instance: instance.to_string(),
                })?;
        update(&mut config);
        self.put_instance_config(&config)?;
        Ok(config)
    }

    /// Remove an instance's config and everything stored under its instance root.
    pub fn remove_instance(&self, instance: &str) -> StewardResult<bool> {
        let config = self.store.remove(&self.keys.instance_config(instance))?;
        let root = self.store.remove(&self.keys.instance_root(instance))?;
        Ok(config || root)
    }

    // === Observed state ===

    pub fn observed_states(&self, instance: &str) -> StewardResult<Vec<ObservedState>> {
        self.read_children(&self.keys.observed_states(instance))
    }

    pub fn observed_state(&self, instance: &str, resource: &str) -> StewardResult<Option<ObservedState>> {
        self.read(&self.keys.observed_state(instance, resource))
    }

    pub fn put_observed_state(&self, state: &ObservedState) -> StewardResult<()> {
        self.write(
            &self.keys.observed_state(&state.instance, &state.resource),
            state,
        )
    }

    // === Instruction queue ===

    pub fn instructions(&self, instance: &str) -> StewardResult<Vec<Instruction>> {
        self.read_children(&self.keys.instructions(instance))
    }

    pub fn put_instruction(&self, instruction: &Instruction) -> StewardResult<()> {
        self.write(
            &self.keys.instruction(&instruction.instance, &instruction.id),
            instruction,
        )
    }

    pub fn delete_instruction(&self, instance: &str, id: &Uuid) -> StewardResult<bool> {
        self.store.remove(&self.keys.instruction(instance, id))
    }

    // === Error markers ===

    pub fn error_markers(&self, instance: &str) -> StewardResult<Vec<ErrorMarkers>> {
        self.read_children(&self.keys.error_markers(instance))
    }

    pub fn error_marker(&self, instance: &str, resource: &str) -> StewardResult<Option<ErrorMarkers>> {
        self.read(&self.keys.error_marker(instance, resource))
    }

    /// Write markers, removing the record once no partition is marked.
    pub fn put_error_markers(&self, instance: &str, markers: &ErrorMarkers) -> StewardResult<()> {
        let path = self.keys.error_marker(instance, &markers.resource);
        if markers.partitions.is_empty() {
            self.store.remove(&path).map(|_| ())
        } else {
            self.write(&path, markers)
        }
    }

    pub fn clear_error_markers(&self, instance: &str) -> StewardResult<bool> {
        self.store.remove(&self.keys.error_markers(instance))
    }

    // === State models ===

    pub fn state_models(&self) -> StewardResult<Vec<StateModelDefinition>> {
        self.read_children(&self.keys.state_models())
    }

    pub fn put_state_model(&self, model: &StateModelDefinition) -> StewardResult<()> {
        self.write(&self.keys.state_model(&model.name), model)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::api::SessionId;
    use crate::control::store::InMemoryStore;

    fn accessor() -> MetadataAccessor {
        MetadataAccessor::new(Arc::new(InMemoryStore::new()), "demo")
    }

    #[test]
    fn key_layout() {
        let keys = PropertyKey::new("demo");
        assert_eq!(keys.desired_state("db"), "/demo/IDEALSTATES/db");
        assert_eq!(keys.instance_config("n1"), "/demo/CONFIGS/PARTICIPANT/n1");
        assert_eq!(
            keys.observed_state("n1", "db"),
            "/demo/INSTANCES/n1/CURRENTSTATES/db"
        );
        assert_eq!(keys.error_marker("n1", "db"), "/demo/INSTANCES/n1/ERRORS/db");
    }

    #[test]
    fn live_instance_round_trip_and_disconnect() {
        let accessor = accessor();
        let live = LiveInstance::new("n1", SessionId::new("s1")).with_version("0.4.0");
        accessor.put_live_instance(&live).unwrap();
        assert_eq!(accessor.live_instances().unwrap(), vec![live]);

        assert!(accessor.remove_live_instance("n1").unwrap());
        assert!(accessor.live_instance("n1").unwrap().is_none());
    }

    #[test]
    fn update_missing_instance_config_fails() {
        let accessor = accessor();
        let err = accessor
            .update_instance_config("ghost", |c| c.enabled = false)
            .unwrap_err();
        assert!(matches!(err, StewardError::InstanceNotFound { .. }));
    }

    #[test]
    fn empty_error_markers_remove_record() {
        let accessor = accessor();
        let mut markers = ErrorMarkers::new("db");
        markers.partitions.insert("db_0".to_string());
        accessor.put_error_markers("n1", &markers).unwrap();
        assert!(accessor.error_marker("n1", "db").unwrap().is_some());

        markers.partitions.clear();
        accessor.put_error_markers("n1", &markers).unwrap();
        assert!(accessor.error_marker("n1", "db").unwrap().is_none());
    }
}
