//! Stage lifecycle.
//!
//! Every stage runs `init`, `pre_process`, `process` and `post_process` in
//! that order, once per run. Only `process` can fail. The controller's stage
//! chain is a closed set, so [`PipelineStage`] is an enum that delegates to
//! the concrete stages.

use crate::control::accessor::MetadataAccessor;
use crate::control::placement::LeaderTieBreak;
use crate::core::error::{StewardError, StewardResult};
use crate::ops::observability::ControllerMetrics;
use crate::pipeline::compatibility::CompatibilityCheckStage;
use crate::pipeline::dispatch::DispatchStage;
use crate::pipeline::event::ClusterEvent;
use crate::pipeline::read::ReadClusterDataStage;
use crate::pipeline::reconcile::ReconcileStage;
use std::sync::Arc;

/// Tunables shared by every stage of a cluster's pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Version the controller reports to the compatibility check.
    pub controller_version: Option<String>,

    /// Maximum instance queues written concurrently.
    pub dispatch_parallelism: usize,

    /// Top-state tie-break policy.
    pub leader_tie_break: LeaderTieBreak,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            controller_version: Some(env!("CARGO_PKG_VERSION").to_string()),
            dispatch_parallelism: 4,
            leader_tie_break: LeaderTieBreak::default(),
        }
    }
}

/// What a stage receives at `init`.
#[derive(Clone)]
pub struct StageContext {
    /// Typed store access for the pipeline's cluster.
    pub accessor: MetadataAccessor,
    /// Pipeline tunables.
    pub settings: PipelineSettings,
    /// Shared metrics.
    pub metrics: Arc<ControllerMetrics>,
}

impl StageContext {
    pub fn new(
        accessor: MetadataAccessor,
        settings: PipelineSettings,
        metrics: Arc<ControllerMetrics>,
    ) -> Self {
        Self {
            accessor,
            settings,
            metrics,
        }
    }

    /// Cluster the pipeline runs for.
    pub fn cluster(&self) -> &str {
        self.accessor.cluster()
    }
}

/// One step of a pipeline run.
pub trait Stage {
    /// Stage identity used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Prepare for a run.
    fn init(&mut self, _context: &StageContext) {}

    /// Called before `process`.
    fn pre_process(&mut self) {}

    /// Do the stage's work. An error aborts the remaining stages.
    fn process(&mut self, event: &mut ClusterEvent) -> StewardResult<()>;

    /// Called after `process`, whether it succeeded or not.
    fn post_process(&mut self) {}
}

/// The controller's stages.
pub enum PipelineStage {
    ReadClusterData(ReadClusterDataStage),
    CompatibilityCheck(CompatibilityCheckStage),
    Reconcile(ReconcileStage),
    Dispatch(DispatchStage),
}

impl PipelineStage {
    fn inner(&self) -> &dyn Stage {
        match self {
            Self::ReadClusterData(s) => s,
            Self::CompatibilityCheck(s) => s,
            Self::Reconcile(s) => s,
            Self::Dispatch(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Stage {
        match self {
            Self::ReadClusterData(s) => s,
            Self::CompatibilityCheck(s) => s,
            Self::Reconcile(s) => s,
            Self::Dispatch(s) => s,
        }
    }
}

impl Stage for PipelineStage {
    fn name(&self) -> &'static str {
        self.inner().name()
    }

    fn init(&mut self, context: &StageContext) {
        self.inner_mut().init(context)
    }

    fn pre_process(&mut self) {
        self.inner_mut().pre_process()
    }

    fn process(&mut self, event: &mut ClusterEvent) -> StewardResult<()> {
        self.inner_mut().process(event)
    }

    fn post_process(&mut self) {
        self.inner_mut().post_process()
    }
}

/// Context of an initialized stage, or an error if `init` never ran.
pub(crate) fn initialized<'a>(
    context: &'a Option<StageContext>,
    stage: &'static str,
) -> StewardResult<&'a StageContext> {
    context
        .as_ref()
        .ok_or_else(|| StewardError::internal(format!("stage {} processed before init", stage)))
}
