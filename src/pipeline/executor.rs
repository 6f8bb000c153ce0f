//! Pipeline executor.
//!
//! Runs an ordered stage chain against one [`ClusterEvent`]. A failing
//! `process` stops the chain: the failing stage still gets its
//! `post_process`, later stages are skipped, and the failure comes back as
//! [`RunOutcome::Aborted`]. Nothing here panics or exits on a stage error.

use crate::core::error::StewardError;
use crate::pipeline::compatibility::CompatibilityCheckStage;
use crate::pipeline::dispatch::DispatchStage;
use crate::pipeline::event::ClusterEvent;
use crate::pipeline::read::ReadClusterDataStage;
use crate::pipeline::reconcile::ReconcileStage;
use crate::pipeline::stage::{PipelineStage, Stage, StageContext};
use std::time::Instant;

/// Result of one pipeline run.
#[derive(Debug)]
pub enum RunOutcome {
    /// Every stage processed.
    Completed,
    /// A stage failed and the remaining stages were skipped.
    Aborted {
        stage: &'static str,
        error: StewardError,
    },
}

impl RunOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Error that aborted the run, if any.
    pub fn error(&self) -> Option<&StewardError> {
        match self {
            Self::Completed => None,
            Self::Aborted { error, .. } => Some(error),
        }
    }

    /// Stage that aborted the run, if any.
    pub fn failed_stage(&self) -> Option<&'static str> {
        match self {
            Self::Completed => None,
            Self::Aborted { stage, .. } => Some(*stage),
        }
    }
}

/// An ordered stage chain bound to one cluster.
pub struct Pipeline {
    context: StageContext,
    stages: Vec<PipelineStage>,
}

impl Pipeline {
    /// Create a pipeline with no stages.
    pub fn new(context: StageContext) -> Self {
        Self {
            context,
            stages: Vec::new(),
        }
    }

    /// The controller's chain: snapshot, version gate, reconcile, dispatch.
    pub fn standard(context: StageContext) -> Self {
        let mut pipeline = Self::new(context);
        pipeline.add_stage(PipelineStage::ReadClusterData(ReadClusterDataStage::new()));
        pipeline.add_stage(PipelineStage::CompatibilityCheck(CompatibilityCheckStage::new()));
        pipeline.add_stage(PipelineStage::Reconcile(ReconcileStage::new()));
        pipeline.add_stage(PipelineStage::Dispatch(DispatchStage::new()));
        pipeline
    }

    /// Append a stage.
    pub fn add_stage(&mut self, stage: PipelineStage) {
        self.stages.push(stage);
    }

    /// Stage names in execution order.
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Context the stages are initialized with.
    pub fn context(&self) -> &StageContext {
        &self.context
    }

    /// Run every stage against `event`.
    pub fn run(&mut self, event: &mut ClusterEvent) -> RunOutcome {
        let started = Instant::now();
        let metrics = self.context.metrics.clone();
        metrics.record_run_started();
        tracing::debug!(
            cluster = %event.cluster(),
            run_id = %event.id(),
            triggers = ?event.triggers(),
            "pipeline run started"
        );

        for stage in self.stages.iter_mut() {
            stage.init(&self.context);
            stage.pre_process();
            let result = stage.process(event);
            stage.post_process();

            if let Err(error) = result {
                let name = stage.name();
                let elapsed = started.elapsed().as_secs_f64() * 1000.0;
                metrics.record_run_aborted(name, elapsed);
                if error.is_retriable() {
                    tracing::warn!(
                        cluster = %event.cluster(),
                        run_id = %event.id(),
                        stage = name,
                        error = %error,
                        "pipeline run aborted"
                    );
                } else {
                    tracing::error!(
                        cluster = %event.cluster(),
                        run_id = %event.id(),
                        stage = name,
                        error = %error,
                        "pipeline run aborted"
                    );
                }
                return RunOutcome::Aborted { stage: name, error };
            }
        }

        let elapsed = started.elapsed().as_secs_f64() * 1000.0;
        metrics.record_run_completed(elapsed);
        tracing::debug!(
            cluster = %event.cluster(),
            run_id = %event.id(),
            elapsed_ms = elapsed,
            "pipeline run completed"
        );
        RunOutcome::Completed
    }
}
