//! Reconciliation engine.
//!
//! For every partition the engine compares the target assignment with the
//! observed labels and plans at most one hop per `(instance, partition)`:
//!
//! 1. Compute the target assignment from live, enabled, unmarked instances.
//! 2. For each instance that is observed or targeted, take the first hop of a
//!    shortest legal path from its observed label (or the initial label) to
//!    its target label (or the initial label).
//! 3. Skip pairs that already have an instruction in flight. Record pairs
//!    without a legal path as stuck.
//! 4. Admit hops against per-label bounds. Counts start from observed labels
//!    plus in-flight targets. A hop out of a label keeps counting against that
//!    label until the participant reports the move, so every handoff of a
//!    bounded label is two-phase. Hops moving down in priority are admitted
//!    first. Hops that would exceed a bound are deferred to a later run.

use crate::control::api::{DesiredState, Instruction};
use crate::control::cache::ClusterDataCache;
use crate::control::placement::{LeaderTieBreak, PartitionAssignment};
use crate::control::state_model::StateModelDefinition;
use crate::core::error::{StewardError, StewardResult};
use crate::pipeline::event::{ClusterEvent, CLUSTER_DATA, INSTRUCTION_PLAN};
use crate::pipeline::stage::{initialized, Stage, StageContext};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

/// A single-hop move of one partition replica.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransitionRef {
    pub instance: String,
    pub resource: String,
    pub partition: String,
    pub from_state: String,
    pub to_state: String,
}

impl TransitionRef {
    /// The stuck-transition error for this move.
    pub fn to_stuck_error(&self) -> StewardError {
        StewardError::StuckTransition {
            instance: self.instance.clone(),
            resource: self.resource.clone(),
            partition: self.partition.clone(),
            from_state: self.from_state.clone(),
            to_state: self.to_state.clone(),
        }
    }
}

/// Output of one reconciliation pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct InstructionPlan {
    /// Instructions to dispatch.
    pub instructions: Vec<Instruction>,

    /// Pairs with no legal path toward their target. `to_state` is the target.
    pub stuck: Vec<TransitionRef>,

    /// Hops held back by a state bound.
    pub deferred: Vec<TransitionRef>,

    /// Resources skipped because their state model is unknown.
    pub skipped_resources: Vec<String>,
}

impl InstructionPlan {
    /// Check if the plan has nothing to dispatch or record.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty() && self.stuck.is_empty()
    }
}

/// Computes instruction plans from cluster snapshots.
#[derive(Debug, Clone, Default)]
pub struct ReconciliationEngine {
    tie_break: LeaderTieBreak,
}

struct Candidate<'a> {
    instance: &'a str,
    from: &'a str,
    to: &'a str,
    rank: usize,
}

impl ReconciliationEngine {
    pub fn new(tie_break: LeaderTieBreak) -> Self {
        Self { tie_break }
    }

    /// Plan every resource in the snapshot.
    pub fn compute(&self, cache: &ClusterDataCache) -> InstructionPlan {
        let mut plan = InstructionPlan::default();
        for desired in cache.desired_states() {
            let Some(model) = cache.state_model(&desired.state_model) else {
                tracing::warn!(
                    cluster = %cache.cluster(),
                    resource = %desired.resource,
                    state_model = %desired.state_model,
                    "unknown state model, resource skipped"
                );
                plan.skipped_resources.push(desired.resource.clone());
                continue;
            };

            let mut partitions: BTreeSet<&str> = desired.partitions().collect();
            partitions.extend(cache.observed_partitions(&desired.resource));
            for partition in partitions {
                self.reconcile_partition(cache, desired, model, partition, &mut plan);
            }
        }
        plan
    }

    fn reconcile_partition(
        &self,
        cache: &ClusterDataCache,
        desired: &DesiredState,
        model: &StateModelDefinition,
        partition: &str,
        plan: &mut InstructionPlan,
    ) {
        let resource = desired.resource.as_str();
        let initial = model.initial_state.as_str();
        let target = PartitionAssignment::compute(cache, desired, model, partition, self.tie_break);

        let observed: HashMap<&str, &str> =
            cache.observed_holders(resource, partition).into_iter().collect();

        let mut instances: BTreeSet<&str> = observed.keys().copied().collect();
        instances.extend(target.states.keys().map(String::as_str));

        // Projected label counts: observed labels plus in-flight targets. The
        // source label of a move is only released once the move is observed.
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for state in observed.values() {
            *counts.entry(*state).or_default() += 1;
        }
        for instance in cache.live_instances() {
            if let Some(pending) =
                cache.pending_instruction(&instance.instance, resource, partition)
            {
                *counts.entry(pending.to_state.as_str()).or_default() += 1;
            }
        }

        let mut candidates = Vec::new();
        for instance in instances {
            if !cache.is_live(instance)
                || cache.pending_instruction(instance, resource, partition).is_some()
                || cache.has_error_marker(instance, resource, partition)
            {
                continue;
            }
            let current = observed.get(instance).copied().unwrap_or(initial);
            let goal = target.state_of(instance).unwrap_or(initial);
            if current == goal {
                continue;
            }
            match model.next_hop(current, goal) {
                Some(hop) => candidates.push(Candidate {
                    instance,
                    from: current,
                    to: hop,
                    rank: target.rank(instance),
                }),
                None => {
                    tracing::warn!(
                        cluster = %cache.cluster(),
                        resource = %resource,
                        partition = %partition,
                        instance = %instance,
                        from_state = %current,
                        to_state = %goal,
                        "no legal transition toward target"
                    );
                    plan.stuck.push(transition(instance, resource, partition, current, goal));
                }
            }
        }

        candidates.sort_by(|a, b| {
            let a_down = model.priority(a.to) > model.priority(a.from);
            let b_down = model.priority(b.to) > model.priority(b.from);
            b_down
                .cmp(&a_down)
                .then_with(|| model.priority(a.to).cmp(&model.priority(b.to)))
                .then_with(|| a.rank.cmp(&b.rank))
                .then_with(|| a.instance.cmp(b.instance))
        });

        let replicas = desired.replicas;
        let eligible = target.eligible.len();
        for candidate in candidates {
            let held = counts.get(candidate.to).copied().unwrap_or(0);
            if let Some(bound) = model.bound(candidate.to, replicas, eligible) {
                if held + 1 > bound {
                    plan.deferred.push(transition(
                        candidate.instance,
                        resource,
                        partition,
                        candidate.from,
                        candidate.to,
                    ));
                    continue;
                }
            }
            let Some(session) = cache.session_of(candidate.instance) else {
                continue;
            };
            *counts.entry(candidate.to).or_default() += 1;
            plan.instructions.push(Instruction::new(
                candidate.instance,
                resource,
                partition,
                (candidate.from.to_string(), candidate.to.to_string()),
                session.clone(),
                model.name.as_str(),
            ));
        }
    }
}

fn transition(instance: &str, resource: &str, partition: &str, from: &str, to: &str) -> TransitionRef {
    TransitionRef {
        instance: instance.to_string(),
        resource: resource.to_string(),
        partition: partition.to_string(),
        from_state: from.to_string(),
        to_state: to.to_string(),
    }
}

/// Pipeline stage wrapping [`ReconciliationEngine`].
#[derive(Default)]
pub struct ReconcileStage {
    context: Option<StageContext>,
}

impl ReconcileStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for ReconcileStage {
    fn name(&self) -> &'static str {
        "Reconcile"
    }

    fn init(&mut self, context: &StageContext) {
        self.context = Some(context.clone());
    }

    fn process(&mut self, event: &mut ClusterEvent) -> StewardResult<()> {
        let context = initialized(&self.context, self.name())?;
        let cache = event.require::<ClusterDataCache>(CLUSTER_DATA)?;
        let engine = ReconciliationEngine::new(context.settings.leader_tie_break);
        let plan = engine.compute(cache);

        context.metrics.record_stuck_transitions(plan.stuck.len());
        tracing::info!(
            cluster = %event.cluster(),
            run_id = %event.id(),
            instructions = plan.instructions.len(),
            stuck = plan.stuck.len(),
            deferred = plan.deferred.len(),
            "reconciliation planned"
        );
        event.insert(INSTRUCTION_PLAN, plan);
        Ok(())
    }
}
