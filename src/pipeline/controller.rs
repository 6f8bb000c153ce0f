//! Per-cluster single-flight controller.
//!
//! Each cluster gets one worker task. Triggers land in a single coalescing
//! slot: the set of pending trigger kinds plus one notification permit. While
//! a run is in flight, further triggers only add to the set, so when the run
//! finishes exactly one new run starts no matter how many triggers arrived.
//! Runs for one cluster never overlap. Runs for different clusters do.
//!
//! The pipeline itself is synchronous and executes on the blocking pool.

use crate::control::api::Acknowledgment;
use crate::core::error::StewardResult;
use crate::ops::observability::ControllerMetrics;
use crate::pipeline::dispatch::{DispatchReport, TransitionDispatcher};
use crate::pipeline::event::{ClusterEvent, TriggerKind, DISPATCH_REPORT, INSTRUCTION_PLAN};
use crate::pipeline::executor::{Pipeline, RunOutcome};
use crate::pipeline::reconcile::InstructionPlan;
use crate::pipeline::stage::StageContext;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use uuid::Uuid;

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunResult {
    Completed,
    Aborted,
}

/// Summary of one finished run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub triggers: Vec<TriggerKind>,
    pub result: RunResult,
    /// Stage that aborted the run.
    pub stage: Option<String>,
    /// Error kind that aborted the run.
    pub error_kind: Option<String>,
    pub error: Option<String>,
    pub instructions: usize,
    pub stuck: usize,
    pub deferred: usize,
    pub dispatched: usize,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl RunSummary {
    fn from_run(event: &ClusterEvent, outcome: &RunOutcome, started: Instant) -> Self {
        let plan = event.get::<InstructionPlan>(INSTRUCTION_PLAN);
        let report = event.get::<DispatchReport>(DISPATCH_REPORT);
        Self {
            run_id: event.id(),
            triggers: event.triggers().iter().copied().collect(),
            result: if outcome.is_completed() {
                RunResult::Completed
            } else {
                RunResult::Aborted
            },
            stage: outcome.failed_stage().map(String::from),
            error_kind: outcome.error().map(|e| e.kind().to_string()),
            error: outcome.error().map(|e| e.to_string()),
            instructions: plan.map_or(0, |p| p.instructions.len()),
            stuck: plan.map_or(0, |p| p.stuck.len()),
            deferred: plan.map_or(0, |p| p.deferred.len()),
            dispatched: report.map_or(0, |r| r.written),
            duration_ms: started.elapsed().as_millis() as u64,
            finished_at: Utc::now(),
        }
    }
}

/// Observable state of a cluster controller.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControllerStatus {
    pub cluster: String,
    /// A run is executing.
    pub running: bool,
    /// Triggers arrived that no run has picked up yet.
    pub pending: bool,
    pub runs_completed: u64,
    pub runs_aborted: u64,
    pub last_run: Option<RunSummary>,
}

impl ControllerStatus {
    /// Total finished runs.
    pub fn runs_finished(&self) -> u64 {
        self.runs_completed + self.runs_aborted
    }
}

#[derive(Default)]
struct TriggerSlot {
    pending: Mutex<BTreeSet<TriggerKind>>,
    notify: Notify,
}

/// Cloneable handle that schedules runs on one controller.
#[derive(Clone)]
pub struct TriggerHandle {
    cluster: String,
    slot: Arc<TriggerSlot>,
    status_tx: Arc<watch::Sender<ControllerStatus>>,
    metrics: Arc<ControllerMetrics>,
}

impl TriggerHandle {
    /// Cluster this handle triggers.
    pub fn cluster(&self) -> &str {
        &self.cluster
    }

    /// Request a run. Coalesces with any run already pending.
    pub fn trigger(&self, kind: TriggerKind) {
        let coalesced = {
            let mut pending = self.slot.pending.lock();
            let coalesced = !pending.is_empty();
            pending.insert(kind);
            coalesced
        };
        if coalesced {
            self.metrics.record_coalesced();
        }
        self.status_tx.send_modify(|s| s.pending = true);
        self.slot.notify.notify_one();
    }
}

/// Worker that owns one cluster's pipeline.
pub struct ClusterController {
    handle: TriggerHandle,
    shutdown_tx: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
    dispatcher: TransitionDispatcher,
}

impl ClusterController {
    /// Spawn the worker task. Must be called within a tokio runtime.
    pub fn spawn(context: StageContext) -> Self {
        let cluster = context.cluster().to_string();
        let metrics = context.metrics.clone();
        let dispatcher = TransitionDispatcher::new(
            context.accessor.clone(),
            context.settings.dispatch_parallelism,
            metrics.clone(),
        );
        let slot = Arc::new(TriggerSlot::default());
        let (status_tx, _) = watch::channel(ControllerStatus {
            cluster: cluster.clone(),
            ..ControllerStatus::default()
        });
        let status_tx = Arc::new(status_tx);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(worker(
            context,
            slot.clone(),
            status_tx.clone(),
            shutdown_rx,
        ));
        metrics.controller_started();
        tracing::info!(cluster = %cluster, "cluster controller started");

        Self {
            handle: TriggerHandle {
                cluster,
                slot,
                status_tx,
                metrics,
            },
            shutdown_tx,
            task: Some(task),
            dispatcher,
        }
    }

    /// Cluster this controller drives.
    pub fn cluster(&self) -> &str {
        self.handle.cluster()
    }

    /// Request a run. Coalesces with any run already pending.
    pub fn trigger(&self, kind: TriggerKind) {
        self.handle.trigger(kind);
    }

    /// A handle that can trigger runs from elsewhere.
    pub fn handle(&self) -> TriggerHandle {
        self.handle.clone()
    }

    /// Current status.
    pub fn status(&self) -> ControllerStatus {
        self.handle.status_tx.borrow().clone()
    }

    /// Watch status changes.
    pub fn subscribe(&self) -> watch::Receiver<ControllerStatus> {
        self.handle.status_tx.subscribe()
    }

    /// Wait until at least `runs` runs have finished.
    pub async fn wait_for_runs(&self, runs: u64) -> ControllerStatus {
        let mut rx = self.subscribe();
        let status = match rx.wait_for(|s| s.runs_finished() >= runs).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        status
    }

    /// Wait until no run is executing or pending.
    pub async fn wait_idle(&self) -> ControllerStatus {
        let mut rx = self.subscribe();
        let status = match rx.wait_for(|s| !s.running && !s.pending).await {
            Ok(status) => status.clone(),
            Err(_) => self.status(),
        };
        status
    }

    /// Retire an acknowledged instruction and schedule a run.
    pub fn acknowledge(&self, ack: &Acknowledgment) -> StewardResult<bool> {
        let removed = self.dispatcher.acknowledge(ack)?;
        self.trigger(TriggerKind::InstructionChange);
        Ok(removed)
    }

    /// Stop the worker after any in-flight run finishes.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!(cluster = %self.handle.cluster, error = %e, "controller task failed");
            }
        }
        self.handle.metrics.controller_stopped();
        tracing::info!(cluster = %self.handle.cluster, "cluster controller stopped");
    }
}

async fn worker(
    context: StageContext,
    slot: Arc<TriggerSlot>,
    status_tx: Arc<watch::Sender<ControllerStatus>>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let cluster = context.cluster().to_string();
    let mut pipeline = Some(Pipeline::standard(context.clone()));

    loop {
        tokio::select! {
            _ = slot.notify.notified() => {}
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
                continue;
            }
        }

        let triggers = std::mem::take(&mut *slot.pending.lock());
        if triggers.is_empty() {
            continue;
        }
        status_tx.send_modify(|s| {
            s.running = true;
            s.pending = false;
        });

        let mut current = pipeline
            .take()
            .unwrap_or_else(|| Pipeline::standard(context.clone()));
        let event = ClusterEvent::with_triggers(cluster.clone(), triggers);
        let started = Instant::now();
        let joined = tokio::task::spawn_blocking(move || {
            let mut event = event;
            let outcome = current.run(&mut event);
            let summary = RunSummary::from_run(&event, &outcome, started);
            (current, summary)
        })
        .await;

        match joined {
            Ok((returned, summary)) => {
                pipeline = Some(returned);
                status_tx.send_modify(|s| {
                    s.running = false;
                    s.pending = !slot.pending.lock().is_empty();
                    match summary.result {
                        RunResult::Completed => s.runs_completed += 1,
                        RunResult::Aborted => s.runs_aborted += 1,
                    }
                    s.last_run = Some(summary);
                });
            }
            Err(e) => {
                // The pipeline is rebuilt for the next run.
                tracing::error!(cluster = %cluster, error = %e, "pipeline run panicked");
                status_tx.send_modify(|s| {
                    s.running = false;
                    s.pending = !slot.pending.lock().is_empty();
                    s.runs_aborted += 1;
                });
            }
        }
    }
}

/// Owns one [`ClusterController`] per cluster.
#[derive(Default)]
pub struct ControllerManager {
    controllers: HashMap<String, ClusterController>,
}

impl ControllerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a controller for the context's cluster. Replaces nothing: a
    /// cluster that already has a controller keeps it.
    pub fn start(&mut self, context: StageContext) -> bool {
        let cluster = context.cluster().to_string();
        if self.controllers.contains_key(&cluster) {
            return false;
        }
        self.controllers
            .insert(cluster, ClusterController::spawn(context));
        true
    }

    /// Trigger a run for `cluster`. Returns false for an unknown cluster.
    pub fn trigger(&self, cluster: &str, kind: TriggerKind) -> bool {
        match self.controllers.get(cluster) {
            Some(controller) => {
                controller.trigger(kind);
                true
            }
            None => false,
        }
    }

    /// Trigger a run for every cluster.
    pub fn trigger_all(&self, kind: TriggerKind) {
        for controller in self.controllers.values() {
            controller.trigger(kind);
        }
    }

    pub fn get(&self, cluster: &str) -> Option<&ClusterController> {
        self.controllers.get(cluster)
    }

    /// Trigger handles for every cluster.
    pub fn handles(&self) -> HashMap<String, TriggerHandle> {
        self.controllers
            .iter()
            .map(|(cluster, controller)| (cluster.clone(), controller.handle()))
            .collect()
    }

    /// Status of every controller, sorted by cluster.
    pub fn statuses(&self) -> Vec<ControllerStatus> {
        let mut statuses: Vec<_> = self.controllers.values().map(|c| c.status()).collect();
        statuses.sort_by(|a, b| a.cluster.cmp(&b.cluster));
        statuses
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    /// Stop every controller.
    pub async fn shutdown_all(&mut self) {
        for (_, controller) in self.controllers.drain() {
            controller.shutdown().await;
        }
    }
}
