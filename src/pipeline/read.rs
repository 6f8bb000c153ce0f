//! Snapshot stage.

use crate::control::cache::ClusterDataCache;
use crate::core::error::StewardResult;
use crate::pipeline::event::{ClusterEvent, CLUSTER_DATA};
use crate::pipeline::stage::{initialized, Stage, StageContext};

/// Loads the run's [`ClusterDataCache`] and stores it on the event.
///
/// Read-only: a store failure aborts the run before anything is written.
#[derive(Default)]
pub struct ReadClusterDataStage {
    context: Option<StageContext>,
}

impl ReadClusterDataStage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Stage for ReadClusterDataStage {
    fn name(&self) -> &'static str {
        "ReadClusterData"
    }

    fn init(&mut self, context: &StageContext) {
        self.context = Some(context.clone());
    }

    fn process(&mut self, event: &mut ClusterEvent) -> StewardResult<()> {
        let context = initialized(&self.context, self.name())?;
        let cache = ClusterDataCache::load(&context.accessor)?;
        if cache.stale_observed_count() > 0 {
            tracing::debug!(
                cluster = %event.cluster(),
                run_id = %event.id(),
                stale = cache.stale_observed_count(),
                "excluded observed entries from previous sessions"
            );
        }
        context.metrics.record_stale_observed(cache.stale_observed_count());
        event.insert(CLUSTER_DATA, cache);
        Ok(())
    }
}
