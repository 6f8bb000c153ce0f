//! Transition dispatch.
//!
//! Writes planned instructions into participant queues, purges instructions
//! issued under sessions that are no longer current, persists stuck
//! transitions as error markers, and retires instructions on acknowledgment.
//!
//! Writes to different instances are independent and run on a bounded set of
//! scoped threads. All of them finish before the stage returns. Failed writes
//! are reported, never retried: the next run plans them again.

use crate::control::accessor::MetadataAccessor;
use crate::control::api::{Acknowledgment, ErrorMarkers, Instruction};
use crate::control::cache::ClusterDataCache;
use crate::core::error::{StewardError, StewardResult};
use crate::ops::observability::ControllerMetrics;
use crate::pipeline::event::{ClusterEvent, CLUSTER_DATA, DISPATCH_REPORT, INSTRUCTION_PLAN};
use crate::pipeline::reconcile::{InstructionPlan, TransitionRef};
use crate::pipeline::stage::{initialized, Stage, StageContext};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One write that did not land.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchError {
    pub instance: String,
    pub path: String,
    pub message: String,
}

/// What a dispatch pass did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchReport {
    /// Instructions written.
    pub written: usize,
    /// Stale instructions removed.
    pub purged: usize,
    /// Error-marker records written.
    pub markers: usize,
    /// Writes and removals that failed.
    pub failures: Vec<DispatchError>,
}

impl DispatchReport {
    /// Check if every write landed.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    fn merge(&mut self, other: DispatchReport) {
        self.written += other.written;
        self.purged += other.purged;
        self.markers += other.markers;
        self.failures.extend(other.failures);
    }
}

/// Writes and retires instructions for one cluster.
#[derive(Clone)]
pub struct TransitionDispatcher {
    accessor: MetadataAccessor,
    parallelism: usize,
    metrics: Arc<ControllerMetrics>,
}

impl TransitionDispatcher {
    pub fn new(accessor: MetadataAccessor, parallelism: usize, metrics: Arc<ControllerMetrics>) -> Self {
        Self {
            accessor,
            parallelism: parallelism.max(1),
            metrics,
        }
    }

    /// Purge stale instructions, write the plan, and persist stuck markers.
    pub fn dispatch(&self, cache: &ClusterDataCache, plan: &InstructionPlan) -> DispatchReport {
        let mut report = self.purge_stale(cache);
        report.merge(self.write_instructions(&plan.instructions));
        report.merge(self.persist_stuck(cache, &plan.stuck));

        self.metrics
            .record_dispatched(report.written, report.failures.len());
        self.metrics.record_stale_purged(report.purged);
        report
    }

    /// Remove every queued instruction whose session is no longer current.
    pub fn purge_stale(&self, cache: &ClusterDataCache) -> DispatchReport {
        let mut report = DispatchReport::default();
        for stale in cache.stale_instructions() {
            match self.accessor.delete_instruction(&stale.instance, &stale.id) {
                Ok(_) => {
                    tracing::debug!(
                        cluster = %self.accessor.cluster(),
                        instance = %stale.instance,
                        resource = %stale.resource,
                        partition = %stale.partition,
                        session = %stale.session,
                        "purged stale instruction"
                    );
                    report.purged += 1;
                }
                Err(e) => report.failures.push(DispatchError {
                    instance: stale.instance.clone(),
                    path: self.accessor.keys().instruction(&stale.instance, &stale.id),
                    message: e.to_string(),
                }),
            }
        }
        report
    }

    /// Write instructions, grouped per instance, on up to `parallelism` threads.
    pub fn write_instructions(&self, instructions: &[Instruction]) -> DispatchReport {
        let mut groups: BTreeMap<&str, Vec<&Instruction>> = BTreeMap::new();
        for instruction in instructions {
            groups
                .entry(instruction.instance.as_str())
                .or_default()
                .push(instruction);
        }
        if groups.is_empty() {
            return DispatchReport::default();
        }

        let workers = self.parallelism.min(groups.len());
        let queue = Mutex::new(groups.into_iter());
        let queue = &queue;
        let accessor = &self.accessor;
        let mut report = DispatchReport::default();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..workers)
                .map(move |_| {
                    scope.spawn(move || {
                        let mut local = DispatchReport::default();
                        loop {
                            let next = queue.lock().next();
                            let Some((instance, batch)) = next else {
                                break;
                            };
                            for instruction in batch {
                                match accessor.put_instruction(instruction) {
                                    Ok(()) => {
                                        tracing::debug!(
                                            cluster = %accessor.cluster(),
                                            instance = %instance,
                                            instruction = %instruction,
                                            "instruction dispatched"
                                        );
                                        local.written += 1;
                                    }
                                    Err(e) => {
                                        tracing::warn!(
                                            cluster = %accessor.cluster(),
                                            instance = %instance,
                                            resource = %instruction.resource,
                                            partition = %instruction.partition,
                                            error = %e,
                                            "instruction write failed"
                                        );
                                        local.failures.push(DispatchError {
                                            instance: instance.to_string(),
                                            path: accessor
                                                .keys()
                                                .instruction(instance, &instruction.id),
                                            message: e.to_string(),
                                        });
                                    }
                                }
                            }
                        }
                        local
                    })
                })
                .collect();

            for handle in handles {
                match handle.join() {
                    Ok(local) => report.merge(local),
                    Err(_) => report.failures.push(DispatchError {
                        instance: String::new(),
                        path: String::new(),
                        message: "dispatch worker panicked".to_string(),
                    }),
                }
            }
        });

        report
    }

    /// Record stuck transitions as error markers.
    pub fn persist_stuck(&self, cache: &ClusterDataCache, stuck: &[TransitionRef]) -> DispatchReport {
        let mut grouped: BTreeMap<(&str, &str), Vec<&str>> = BTreeMap::new();
        for t in stuck {
            grouped
                .entry((t.instance.as_str(), t.resource.as_str()))
                .or_default()
                .push(t.partition.as_str());
        }

        let mut report = DispatchReport::default();
        for ((instance, resource), partitions) in grouped {
            let mut markers = ErrorMarkers::new(resource);
            if let Some(existing) = cache.error_markers(instance, resource) {
                markers.partitions.extend(existing.iter().cloned());
            }
            markers
                .partitions
                .extend(partitions.into_iter().map(String::from));
            match self.accessor.put_error_markers(instance, &markers) {
                Ok(()) => report.markers += 1,
                Err(e) => report.failures.push(DispatchError {
                    instance: instance.to_string(),
                    path: self.accessor.keys().error_marker(instance, resource),
                    message: e.to_string(),
                }),
            }
        }
        report
    }

    /// Retire an acknowledged instruction.
    ///
    /// The record is deleted even when the acknowledging session is not the
    /// instance's current one. Returns whether a record was removed.
    pub fn acknowledge(&self, ack: &Acknowledgment) -> StewardResult<bool> {
        let live = self.accessor.live_instance(&ack.instance)?;
        if live.as_ref().map(|l| &l.session) != Some(&ack.session) {
            tracing::warn!(
                cluster = %self.accessor.cluster(),
                instance = %ack.instance,
                instruction_id = %ack.instruction_id,
                session = %ack.session,
                "acknowledgment from a session that is not current"
            );
        }
        let removed = self
            .accessor
            .delete_instruction(&ack.instance, &ack.instruction_id)?;
        self.metrics.record_acknowledgment();
        Ok(removed)
    }
}

/// Pipeline stage wrapping [`TransitionDispatcher`].
#[derive(Default)]
pub struct DispatchStage {
    context: Option<StageContext>,
}

impl DispatchStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for DispatchStage {
    fn name(&self) -> &'static str {
        "Dispatch"
    }

    fn init(&mut self, context: &StageContext) {
        self.context = Some(context.clone());
    }

    fn process(&mut self, event: &mut ClusterEvent) -> StewardResult<()> {
        let context = initialized(&self.context, self.name())?;
        let cache = event.require::<ClusterDataCache>(CLUSTER_DATA)?;
        let plan = event.require::<InstructionPlan>(INSTRUCTION_PLAN)?;
        let dispatcher = TransitionDispatcher::new(
            context.accessor.clone(),
            context.settings.dispatch_parallelism,
            context.metrics.clone(),
        );
        let report = dispatcher.dispatch(cache, plan);

        let result = if report.is_success() {
            Ok(())
        } else {
            let message = report
                .failures
                .iter()
                .map(|f| format!("{}: {}", f.path, f.message))
                .collect::<Vec<_>>()
                .join("; ");
            Err(StewardError::DispatchFailure {
                failed: report.failures.len(),
                message,
            })
        };
        event.insert(DISPATCH_REPORT, report);
        result
    }
}
