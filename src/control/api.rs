//! Cluster metadata records.
//!
//! These are the records the controller reads from and writes to the metadata
//! store: desired placement per resource, participant liveness, static
//! participant configuration, participant-reported partition state, and the
//! instructions the controller queues for participants.
//!
//! Liveness is session scoped. Every fact derived from a participant carries
//! the [`SessionId`] it was produced under, and staleness is a plain
//! comparison against the participant's current live session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

/// Opaque token identifying one continuous connection of a participant.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Generate a fresh random session token.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Desired placement for one resource.
///
/// Preference lists are ordered highest priority first. The controller
/// derives the concrete state each instance should hold from the list, the
/// replica count, and the state model's bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesiredState {
    /// Resource name.
    pub resource: String,

    /// Name of the state model governing this resource's replicas.
    pub state_model: String,

    /// Number of replicas per partition (including the top-state holder).
    pub replicas: usize,

    /// Number of partitions.
    pub partition_count: usize,

    /// Partition name to ordered preference list of instance names.
    pub preference_lists: BTreeMap<String, Vec<String>>,
}

impl DesiredState {
    /// Create an empty desired state.
    pub fn new(resource: impl Into<String>, state_model: impl Into<String>, replicas: usize) -> Self {
        Self {
            resource: resource.into(),
            state_model: state_model.into(),
            replicas,
            partition_count: 0,
            preference_lists: BTreeMap::new(),
        }
    }

    /// Set the preference list of a partition.
    pub fn set_preference_list(&mut self, partition: impl Into<String>, instances: Vec<String>) {
        self.preference_lists.insert(partition.into(), instances);
        self.partition_count = self.preference_lists.len();
    }

    /// Get the preference list of a partition.
    pub fn preference_list(&self, partition: &str) -> Option<&[String]> {
        self.preference_lists.get(partition).map(Vec::as_slice)
    }

    /// Iterate over partition names in order.
    pub fn partitions(&self) -> impl Iterator<Item = &str> {
        self.preference_lists.keys().map(String::as_str)
    }
}

/// A connected participant. Present in the store only while connected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiveInstance {
    /// Instance name.
    pub instance: String,

    /// Session of the current connection.
    pub session: SessionId,

    /// Version the participant reports, if any.
    #[serde(default)]
    pub version: Option<String>,

    /// Free-form process metadata (pid, host, ...).
    #[serde(default)]
    pub process: BTreeMap<String, String>,
}

impl LiveInstance {
    pub fn new(instance: impl Into<String>, session: SessionId) -> Self {
        Self {
            instance: instance.into(),
            session,
            version: None,
            process: BTreeMap::new(),
        }
    }

    /// Set the reported version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// Static per-instance configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Instance name.
    pub instance: String,

    /// Disabled instances are never assigned a state.
    pub enabled: bool,

    /// Operator tags.
    #[serde(default)]
    pub tags: BTreeSet<String>,

    /// Resource name to partitions disabled on this instance.
    #[serde(default)]
    pub disabled_partitions: BTreeMap<String, BTreeSet<String>>,
}

impl InstanceConfig {
    /// Create an enabled instance config.
    pub fn new(instance: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            enabled: true,
            tags: BTreeSet::new(),
            disabled_partitions: BTreeMap::new(),
        }
    }

    /// Check if a partition is disabled on this instance.
    pub fn is_partition_disabled(&self, resource: &str, partition: &str) -> bool {
        self.disabled_partitions
            .get(resource)
            .is_some_and(|p| p.contains(partition))
    }

    /// Check if this instance may be assigned the given partition.
    pub fn is_eligible(&self, resource: &str, partition: &str) -> bool {
        self.enabled && !self.is_partition_disabled(resource, partition)
    }

    /// Enable or disable a set of partitions on this instance.
    pub fn set_partitions_enabled<'a>(
        &mut self,
        resource: &str,
        partitions: impl IntoIterator<Item = &'a str>,
        enabled: bool,
    ) {
        let set = self
            .disabled_partitions
            .entry(resource.to_string())
            .or_default();
        for partition in partitions {
            if enabled {
                set.remove(partition);
            } else {
                set.insert(partition.to_string());
            }
        }
        if set.is_empty() {
            self.disabled_partitions.remove(resource);
        }
    }
}

/// One partition's reported state on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedEntry {
    /// Current state label.
    pub state: String,

    /// Session the label was reported under.
    pub session: SessionId,
}

/// Reported state of every partition of one resource on one instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedState {
    /// Reporting instance.
    pub instance: String,

    /// Resource name.
    pub resource: String,

    /// Partition name to reported entry.
    pub partitions: BTreeMap<String, ObservedEntry>,
}

impl ObservedState {
    pub fn new(instance: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            instance: instance.into(),
            resource: resource.into(),
            partitions: BTreeMap::new(),
        }
    }

    /// Record a partition's state under a session.
    pub fn set(&mut self, partition: impl Into<String>, state: impl Into<String>, session: SessionId) {
        self.partitions.insert(
            partition.into(),
            ObservedEntry {
                state: state.into(),
                session,
            },
        );
    }

    /// Get a partition's entry.
    pub fn get(&self, partition: &str) -> Option<&ObservedEntry> {
        self.partitions.get(partition)
    }
}

/// A directive to move one partition replica on one instance by one hop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    /// Unique instruction id.
    pub id: Uuid,

    /// Target instance.
    pub instance: String,

    /// Resource name.
    pub resource: String,

    /// Partition name.
    pub partition: String,

    /// Label the replica is expected to hold.
    pub from_state: String,

    /// Label the replica should move to.
    pub to_state: String,

    /// Session of the target at planning time.
    pub session: SessionId,

    /// State model governing the transition.
    pub state_model: String,

    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Instruction {
    /// Create a new instruction with a fresh id.
    pub fn new(
        instance: impl Into<String>,
        resource: impl Into<String>,
        partition: impl Into<String>,
        transition: (String, String),
        session: SessionId,
        state_model: impl Into<String>,
    ) -> Self {
        let (from_state, to_state) = transition;
        Self {
            id: Uuid::new_v4(),
            instance: instance.into(),
            resource: resource.into(),
            partition: partition.into(),
            from_state,
            to_state,
            session,
            state_model: state_model.into(),
            created_at: Utc::now(),
        }
    }

    /// Check if this instruction was issued under the given session.
    pub fn is_current(&self, session: &SessionId) -> bool {
        &self.session == session
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {}/{}: {} -> {}",
            self.instance, self.resource, self.partition, self.from_state, self.to_state
        )
    }
}

/// Partitions of one resource marked in error on one instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorMarkers {
    /// Resource name.
    pub resource: String,

    /// Marked partitions.
    pub partitions: BTreeSet<String>,
}

impl ErrorMarkers {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            partitions: BTreeSet::new(),
        }
    }
}

/// Completion signal a participant sends for one instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Acknowledgment {
    /// Acknowledging instance.
    pub instance: String,

    /// Instruction being acknowledged.
    pub instruction_id: Uuid,

    /// Session the participant acknowledged under.
    pub session: SessionId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_partitions_toggle() {
        let mut config = InstanceConfig::new("localhost_0");
        config.set_partitions_enabled("db", ["db_0", "db_1"], false);
        assert!(!config.is_eligible("db", "db_0"));
        assert!(config.is_eligible("db", "db_2"));

        config.set_partitions_enabled("db", ["db_0", "db_1"], true);
        assert!(config.disabled_partitions.is_empty());
        assert!(config.is_eligible("db", "db_0"));
    }

    #[test]
    fn instruction_session_check() {
        let session = SessionId::new("s1");
        let instruction = Instruction::new(
            "localhost_0",
            "db",
            "db_0",
            ("OFFLINE".into(), "SLAVE".into()),
            session.clone(),
            "MasterSlave",
        );
        assert!(instruction.is_current(&session));
        assert!(!instruction.is_current(&SessionId::new("s2")));
    }
}
