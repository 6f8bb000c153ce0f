//! Version gate.
//!
//! Runs before anything is planned or written. One incompatible live
//! participant aborts the whole run.

use crate::control::cache::ClusterDataCache;
use crate::core::error::{StewardError, StewardResult};
use crate::ops::version::CompatibilityCheck;
use crate::pipeline::event::{ClusterEvent, CLUSTER_DATA, COMPATIBILITY};
use crate::pipeline::stage::{initialized, Stage, StageContext};
use serde::Serialize;

/// One participant that failed the check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncompatibleParticipant {
    pub instance: String,
    pub version: Option<String>,
    pub reason: String,
}

/// Outcome of checking every live participant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompatibilityReport {
    pub controller_version: Option<String>,
    pub checked: usize,
    pub incompatible: Vec<IncompatibleParticipant>,
}

impl CompatibilityReport {
    /// Check if the run may proceed.
    pub fn is_compatible(&self) -> bool {
        self.controller_version_ok() && self.incompatible.is_empty()
    }

    fn controller_version_ok(&self) -> bool {
        CompatibilityCheck::check(self.controller_version.as_deref(), None).compatible
    }
}

/// Compares the controller's version with every live participant's.
#[derive(Debug, Clone)]
pub struct CompatibilityGate {
    controller_version: Option<String>,
}

impl CompatibilityGate {
    pub fn new(controller_version: Option<String>) -> Self {
        Self { controller_version }
    }

    /// Check every live participant without deciding go/no-go.
    pub fn evaluate(&self, cache: &ClusterDataCache) -> CompatibilityReport {
        let controller = self.controller_version.as_deref();
        let mut checked = 0;
        let mut incompatible = Vec::new();
        for live in cache.live_instances() {
            checked += 1;
            let check = CompatibilityCheck::check(controller, live.version.as_deref());
            if let Some(reason) = check.reason {
                incompatible.push(IncompatibleParticipant {
                    instance: live.instance.clone(),
                    version: live.version.clone(),
                    reason,
                });
            }
        }
        CompatibilityReport {
            controller_version: self.controller_version.clone(),
            checked,
            incompatible,
        }
    }

    /// Check every live participant and fail if the run must not proceed.
    ///
    /// A controller without a usable version fails even with no participants.
    pub fn check(&self, cache: &ClusterDataCache) -> StewardResult<CompatibilityReport> {
        let report = self.evaluate(cache);
        if report.is_compatible() {
            Ok(report)
        } else {
            Err(StewardError::IncompatibleVersion {
                controller_version: report.controller_version.clone(),
                instances: report
                    .incompatible
                    .iter()
                    .map(|p| p.instance.clone())
                    .collect(),
            })
        }
    }
}

/// Pipeline stage wrapping [`CompatibilityGate`].
#[derive(Default)]
pub struct CompatibilityCheckStage {
    context: Option<StageContext>,
}

impl CompatibilityCheckStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for CompatibilityCheckStage {
    fn name(&self) -> &'static str {
        "CompatibilityCheck"
    }

    fn init(&mut self, context: &StageContext) {
        self.context = Some(context.clone());
    }

    fn process(&mut self, event: &mut ClusterEvent) -> StewardResult<()> {
        let context = initialized(&self.context, self.name())?;
        let cache = event.require::<ClusterDataCache>(CLUSTER_DATA)?;
        let gate = CompatibilityGate::new(context.settings.controller_version.clone());
        let report = gate.evaluate(cache);

        for participant in &report.incompatible {
            tracing::warn!(
                cluster = %event.cluster(),
                run_id = %event.id(),
                instance = %participant.instance,
                participant_version = participant.version.as_deref().unwrap_or("<absent>"),
                controller_version = report.controller_version.as_deref().unwrap_or("<absent>"),
                reason = %participant.reason,
                "incompatible participant"
            );
        }
        context.metrics.record_incompatible(report.incompatible.len());

        let result = gate.check(cache);
        event.insert(COMPATIBILITY, report);
        result.map(|_| ())
    }
}
