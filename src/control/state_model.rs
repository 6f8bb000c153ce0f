//! State machine definitions for partition replicas.
//!
//! A definition names a finite set of labels in priority order (highest
//! first), one initial label, the legal `(from, to)` transitions, and
//! optional per-label upper bounds that apply per partition.
//!
//! Multi-hop moves are planned one hop at a time. [`StateModelDefinition::next_hop`]
//! walks the transition table breadth-first so the chosen hop always lies on
//! a shortest legal path; ties go to the higher priority label.

use crate::core::error::{StewardError, StewardResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Label participants report when a transition failed on their side.
pub const ERROR_STATE: &str = "ERROR";

/// Terminal label for replicas being removed entirely.
pub const DROPPED_STATE: &str = "DROPPED";

/// Name of the built-in master/slave model.
pub const MASTER_SLAVE: &str = "MasterSlave";

/// Name of the built-in online/offline model.
pub const ONLINE_OFFLINE: &str = "OnlineOffline";

/// Name of the built-in leader/standby model.
pub const LEADER_STANDBY: &str = "LeaderStandby";

/// Upper bound on how many instances may hold a label for one partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum StateBound {
    /// Fixed count.
    Fixed(usize),
    /// The resource's replica count (`R`).
    Replicas,
    /// The number of eligible live instances (`N`).
    LiveInstances,
}

impl StateBound {
    /// Resolve the bound for a resource with `replicas` replicas and
    /// `eligible` eligible instances.
    pub fn resolve(&self, replicas: usize, eligible: usize) -> usize {
        match self {
            Self::Fixed(n) => *n,
            Self::Replicas => replicas,
            Self::LiveInstances => eligible,
        }
    }
}

impl From<StateBound> for String {
    fn from(bound: StateBound) -> Self {
        match bound {
            StateBound::Fixed(n) => n.to_string(),
            StateBound::Replicas => "R".to_string(),
            StateBound::LiveInstances => "N".to_string(),
        }
    }
}

impl TryFrom<String> for StateBound {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.trim() {
            "R" => Ok(Self::Replicas),
            "N" => Ok(Self::LiveInstances),
            other => other
                .parse::<usize>()
                .map(Self::Fixed)
                .map_err(|_| format!("invalid state bound '{}': expected a count, R or N", other)),
        }
    }
}

/// A legal transition between two labels.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    pub to: String,
}

impl Transition {
    pub fn new(from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
        }
    }
}

/// A replica state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateModelDefinition {
    /// Model name, referenced by desired states.
    pub name: String,

    /// Label a replica holds before it is assigned anything.
    pub initial_state: String,

    /// All labels, highest priority first.
    pub states: Vec<String>,

    /// Legal transitions.
    pub transitions: Vec<Transition>,

    /// Per-label upper bounds.
    #[serde(default)]
    pub bounds: BTreeMap<String, StateBound>,
}

impl StateModelDefinition {
    /// Create a definition from its parts.
    pub fn new(
        name: impl Into<String>,
        initial_state: impl Into<String>,
        states: &[&str],
        transitions: &[(&str, &str)],
    ) -> Self {
        Self {
            name: name.into(),
            initial_state: initial_state.into(),
            states: states.iter().map(|s| s.to_string()).collect(),
            transitions: transitions
                .iter()
                .map(|(from, to)| Transition::new(*from, *to))
                .collect(),
            bounds: BTreeMap::new(),
        }
    }

    /// Add an upper bound for a label.
    pub fn with_bound(mut self, state: impl Into<String>, bound: StateBound) -> Self {
        self.bounds.insert(state.into(), bound);
        self
    }

    /// One master, up to R slaves.
    pub fn master_slave() -> Self {
        Self::new(
            MASTER_SLAVE,
            "OFFLINE",
            &["MASTER", "SLAVE", "OFFLINE", DROPPED_STATE],
            &[
                ("OFFLINE", "SLAVE"),
                ("SLAVE", "MASTER"),
                ("MASTER", "SLAVE"),
                ("SLAVE", "OFFLINE"),
                ("OFFLINE", DROPPED_STATE),
            ],
        )
        .with_bound("MASTER", StateBound::Fixed(1))
        .with_bound("SLAVE", StateBound::Replicas)
    }

    /// Up to R online replicas, no leader.
    pub fn online_offline() -> Self {
        Self::new(
            ONLINE_OFFLINE,
            "OFFLINE",
            &["ONLINE", "OFFLINE", DROPPED_STATE],
            &[
                ("OFFLINE", "ONLINE"),
                ("ONLINE", "OFFLINE"),
                ("OFFLINE", DROPPED_STATE),
            ],
        )
        .with_bound("ONLINE", StateBound::Replicas)
    }

    /// One leader, up to R standbys.
    pub fn leader_standby() -> Self {
        Self::new(
            LEADER_STANDBY,
            "OFFLINE",
            &["LEADER", "STANDBY", "OFFLINE", DROPPED_STATE],
            &[
                ("OFFLINE", "STANDBY"),
                ("STANDBY", "LEADER"),
                ("LEADER", "STANDBY"),
                ("STANDBY", "OFFLINE"),
                ("OFFLINE", DROPPED_STATE),
            ],
        )
        .with_bound("LEADER", StateBound::Fixed(1))
        .with_bound("STANDBY", StateBound::Replicas)
    }

    /// Look up a built-in model by name.
    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            MASTER_SLAVE => Some(Self::master_slave()),
            ONLINE_OFFLINE => Some(Self::online_offline()),
            LEADER_STANDBY => Some(Self::leader_standby()),
            _ => None,
        }
    }

    /// All built-in models.
    pub fn builtins() -> Vec<Self> {
        vec![
            Self::master_slave(),
            Self::online_offline(),
            Self::leader_standby(),
        ]
    }

    /// Check the definition is internally consistent.
    pub fn validate(&self) -> StewardResult<()> {
        let known: HashSet<&str> = self.states.iter().map(String::as_str).collect();
        if !known.contains(self.initial_state.as_str()) {
            return Err(StewardError::invalid_request(format!(
                "state model {}: initial state {} is not a declared state",
                self.name, self.initial_state
            )));
        }
        for t in &self.transitions {
            if !known.contains(t.from.as_str()) || !known.contains(t.to.as_str()) {
                return Err(StewardError::invalid_request(format!(
                    "state model {}: transition {} -> {} names an undeclared state",
                    self.name, t.from, t.to
                )));
            }
        }
        if let Some(state) = self.bounds.keys().find(|s| !known.contains(s.as_str())) {
            return Err(StewardError::invalid_request(format!(
                "state model {}: bound on undeclared state {}",
                self.name, state
            )));
        }
        Ok(())
    }

    /// Check if `from -> to` is in the transition table.
    pub fn is_legal(&self, from: &str, to: &str) -> bool {
        self.transitions.iter().any(|t| t.from == from && t.to == to)
    }

    /// Priority rank of a label; lower is higher priority. Unknown labels rank last.
    pub fn priority(&self, state: &str) -> usize {
        self.states
            .iter()
            .position(|s| s == state)
            .unwrap_or(usize::MAX)
    }

    /// Upper bound for a label, if any.
    pub fn bound(&self, state: &str, replicas: usize, eligible: usize) -> Option<usize> {
        self.bounds
            .get(state)
            .map(|b| b.resolve(replicas, eligible))
    }

    /// Labels that placement may assign, highest priority first.
    pub fn assignable_states(&self) -> impl Iterator<Item = &str> {
        self.states.iter().map(String::as_str).filter(move |s| {
            *s != self.initial_state
                && *s != DROPPED_STATE
                && *s != ERROR_STATE
                && !matches!(self.bounds.get(*s), Some(StateBound::Fixed(0)))
        })
    }

    /// First hop of a shortest legal path from `from` to `to`.
    ///
    /// Returns `None` when `from == to` or when `to` is unreachable.
    pub fn next_hop(&self, from: &str, to: &str) -> Option<&str> {
        if from == to {
            return None;
        }

        let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
        for t in &self.transitions {
            edges.entry(t.from.as_str()).or_default().push(t.to.as_str());
        }
        for targets in edges.values_mut() {
            targets.sort_by_key(|s| self.priority(s));
        }

        // BFS recording the first hop that reached each node.
        let mut first_hop: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::new();
        for next in edges.get(from).into_iter().flatten() {
            if !first_hop.contains_key(next) {
                first_hop.insert(*next, *next);
                queue.push_back(*next);
            }
        }
        while let Some(node) = queue.pop_front() {
            let hop = first_hop[node];
            if node == to {
                return Some(hop);
            }
            for next in edges.get(node).into_iter().flatten() {
                if *next != from && !first_hop.contains_key(next) {
                    first_hop.insert(*next, hop);
                    queue.push_back(*next);
                }
            }
        }
        None
    }
}
