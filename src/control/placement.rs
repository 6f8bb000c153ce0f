//! Partition placement.
//!
//! Two concerns live here:
//!
//! - The ideal-state calculator, which lays out a fresh resource's preference
//!   lists so top states spread evenly across instances.
//! - Target assignment, which turns one partition's preference list into a
//!   concrete `instance -> label` map given who is live, enabled and healthy.
//!
//! Target assignment fills labels in priority order, each up to its bound,
//! never assigning more than the resource's replica count in total. A label
//! bounded to one holder is therefore never assigned twice.

use crate::control::api::DesiredState;
use crate::control::cache::ClusterDataCache;
use crate::control::state_model::StateModelDefinition;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which eligible instance takes a partition's top state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeaderTieBreak {
    /// First eligible instance in the preference list.
    #[default]
    PreferenceOrder,
    /// An eligible instance already holding the top state keeps it.
    StickyCurrentHolder,
}

impl std::fmt::Display for LeaderTieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PreferenceOrder => write!(f, "preference_order"),
            Self::StickyCurrentHolder => write!(f, "sticky_current_holder"),
        }
    }
}

impl std::str::FromStr for LeaderTieBreak {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "preference_order" => Ok(Self::PreferenceOrder),
            "sticky_current_holder" => Ok(Self::StickyCurrentHolder),
            other => Err(format!(
                "unknown leader tie-break '{}': expected preference_order or sticky_current_holder",
                other
            )),
        }
    }
}

/// Partition name for index `p` of `resource`.
pub fn partition_name(resource: &str, p: usize) -> String {
    format!("{}_{}", resource, p)
}

/// Lay out a desired state for a new resource.
///
/// Partition `p` lists every instance starting at `p mod n` and wrapping
/// around, so consecutive partitions prefer consecutive instances.
pub fn calculate_ideal_state(
    instances: &[String],
    partitions: usize,
    replicas: usize,
    resource: &str,
    state_model: &str,
) -> DesiredState {
    let mut desired = DesiredState::new(resource, state_model, replicas);
    let n = instances.len();
    for p in 0..partitions {
        let preference = (0..n).map(|i| instances[(p + i) % n].clone()).collect();
        desired.set_preference_list(partition_name(resource, p), preference);
    }
    desired.partition_count = partitions;
    desired
}

/// Target labels for one partition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionAssignment {
    /// Eligible instances in tie-break order.
    pub eligible: Vec<String>,

    /// Instance to target label. Instances not present target the initial label.
    pub states: BTreeMap<String, String>,
}

impl PartitionAssignment {
    /// Compute the target assignment of `partition` of `desired`.
    pub fn compute(
        cache: &ClusterDataCache,
        desired: &DesiredState,
        model: &StateModelDefinition,
        partition: &str,
        tie_break: LeaderTieBreak,
    ) -> Self {
        let resource = desired.resource.as_str();
        let mut eligible: Vec<String> = desired
            .preference_list(partition)
            .unwrap_or_default()
            .iter()
            .filter(|instance| {
                cache.is_live(instance)
                    && cache
                        .instance_config(instance)
                        .is_some_and(|c| c.is_eligible(resource, partition))
                    && !cache.has_error_marker(instance, resource, partition)
            })
            .cloned()
            .collect();

        if tie_break == LeaderTieBreak::StickyCurrentHolder {
            if let Some(top) = model.assignable_states().next() {
                if let Some(pos) = eligible
                    .iter()
                    .position(|i| cache.observed_state(i, resource, partition) == Some(top))
                {
                    let holder = eligible.remove(pos);
                    eligible.insert(0, holder);
                }
            }
        }

        let replicas = desired.replicas;
        let n = eligible.len();
        let mut states = BTreeMap::new();
        let mut candidates = eligible.iter();
        let mut assigned = 0;
        for state in model.assignable_states() {
            let bound = model.bound(state, replicas, n).unwrap_or(replicas);
            let take = bound.min(replicas.saturating_sub(assigned));
            for instance in candidates.by_ref().take(take) {
                states.insert(instance.clone(), state.to_string());
                assigned += 1;
            }
        }

        Self { eligible, states }
    }

    /// Target label of an instance, if it is assigned one.
    pub fn state_of(&self, instance: &str) -> Option<&str> {
        self.states.get(instance).map(String::as_str)
    }

    /// Number of instances assigned `state`.
    pub fn count(&self, state: &str) -> usize {
        self.states.values().filter(|s| *s == state).count()
    }

    /// Position of an instance in the tie-break order.
    pub fn rank(&self, instance: &str) -> usize {
        self.eligible
            .iter()
            .position(|i| i == instance)
            .unwrap_or(usize::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("localhost_{}", i)).collect()
    }

    #[test]
    fn ideal_state_rotates_preference_lists() {
        let desired = calculate_ideal_state(&names(5), 10, 1, "testResource", "MasterSlave");
        assert_eq!(desired.partition_count, 10);
        assert_eq!(desired.preference_lists.len(), 10);

        let p0 = desired.preference_list("testResource_0").unwrap();
        assert_eq!(p0[0], "localhost_0");
        assert_eq!(p0.len(), 5);

        let p7 = desired.preference_list("testResource_7").unwrap();
        assert_eq!(p7[0], "localhost_2");
        assert_eq!(p7[1], "localhost_3");
    }

    #[test]
    fn ideal_state_with_no_instances_has_empty_lists() {
        let desired = calculate_ideal_state(&[], 3, 1, "db", "MasterSlave");
        assert_eq!(desired.partition_count, 3);
        assert!(desired.preference_list("db_0").unwrap().is_empty());
    }

    #[test]
    fn tie_break_parses() {
        assert_eq!(
            "sticky_current_holder".parse::<LeaderTieBreak>(),
            Ok(LeaderTieBreak::StickyCurrentHolder)
        );
        assert!("first".parse::<LeaderTieBreak>().is_err());
        assert_eq!(LeaderTieBreak::default().to_string(), "preference_order");
    }
}
