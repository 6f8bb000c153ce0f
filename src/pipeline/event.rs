//! Cluster events.
//!
//! A [`ClusterEvent`] is created per trigger and discarded after the run. It
//! carries the trigger reasons plus a typed attribute map stages use to hand
//! results to later stages.

use crate::core::error::{StewardError, StewardResult};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

/// Attribute holding the run's [`ClusterDataCache`](crate::control::cache::ClusterDataCache).
pub const CLUSTER_DATA: &str = "ClusterDataCache";

/// Attribute holding the [`CompatibilityReport`](crate::pipeline::compatibility::CompatibilityReport).
pub const COMPATIBILITY: &str = "CompatibilityReport";

/// Attribute holding the [`InstructionPlan`](crate::pipeline::reconcile::InstructionPlan).
pub const INSTRUCTION_PLAN: &str = "InstructionPlan";

/// Attribute holding the [`DispatchReport`](crate::pipeline::dispatch::DispatchReport).
pub const DISPATCH_REPORT: &str = "DispatchReport";

/// Why a run was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    /// A participant connected or disconnected.
    LiveInstanceChange,
    /// Instance or state-model configuration changed.
    ConfigChange,
    /// A resource's desired state changed.
    DesiredStateChange,
    /// A participant reported new partition state.
    ObservedStateChange,
    /// An instruction queue changed (acknowledgment).
    InstructionChange,
    /// An operator command was applied.
    AdminCommand,
    /// Periodic rebalance tick.
    Periodic,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::LiveInstanceChange => "live_instance_change",
            Self::ConfigChange => "config_change",
            Self::DesiredStateChange => "desired_state_change",
            Self::ObservedStateChange => "observed_state_change",
            Self::InstructionChange => "instruction_change",
            Self::AdminCommand => "admin_command",
            Self::Periodic => "periodic",
        };
        f.write_str(name)
    }
}

/// Mutable scratch space shared by the stages of one run.
pub struct ClusterEvent {
    id: Uuid,
    cluster: String,
    triggers: BTreeSet<TriggerKind>,
    attributes: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl ClusterEvent {
    /// Create an event for `cluster` with one trigger.
    pub fn new(cluster: impl Into<String>, trigger: TriggerKind) -> Self {
        Self::with_triggers(cluster, [trigger])
    }

    /// Create an event carrying several coalesced triggers.
    pub fn with_triggers(
        cluster: impl Into<String>,
        triggers: impl IntoIterator<Item = TriggerKind>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            cluster: cluster.into(),
            triggers: triggers.into_iter().collect(),
            attributes: HashMap::new(),
        }
    }

    /// Unique run identifier.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Cluster this event is for.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Trigger reasons.
    pub fn triggers(&self) -> &BTreeSet<TriggerKind> {
        &self.triggers
    }

    /// Store an attribute, replacing any previous value.
    pub fn insert<T: Any + Send + Sync>(&mut self, name: &'static str, value: T) {
        self.attributes.insert(name, Box::new(value));
    }

    /// Borrow an attribute of type `T`.
    pub fn get<T: Any + Send + Sync>(&self, name: &'static str) -> Option<&T> {
        self.attributes.get(name)?.downcast_ref()
    }

    /// Borrow an attribute a stage depends on.
    pub fn require<T: Any + Send + Sync>(&self, name: &'static str) -> StewardResult<&T> {
        self.get(name)
            .ok_or(StewardError::MissingAttribute { name })
    }

    /// Remove and return an attribute of type `T`.
    ///
    /// The attribute stays in place if it holds a different type.
    pub fn take<T: Any + Send + Sync>(&mut self, name: &'static str) -> Option<T> {
        let boxed = self.attributes.remove(name)?;
        match boxed.downcast::<T>() {
            Ok(value) => Some(*value),
            Err(other) => {
                self.attributes.insert(name, other);
                None
            }
        }
    }

    /// Check if an attribute is present.
    pub fn contains(&self, name: &'static str) -> bool {
        self.attributes.contains_key(name)
    }
}

impl std::fmt::Debug for ClusterEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut attributes: Vec<&&str> = self.attributes.keys().collect();
        attributes.sort();
        f.debug_struct("ClusterEvent")
            .field("id", &self.id)
            .field("cluster", &self.cluster)
            .field("triggers", &self.triggers)
            .field("attributes", &attributes)
            .finish()
    }
}
