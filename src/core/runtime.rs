//! Main runtime orchestration.
//!
//! The runtime coordinates component lifecycle:
//! - Start order: metadata store → cluster controllers → change router → rebalance ticker
//! - Shutdown order: ticker → router → controllers
//!
//! The embedded store is seeded from the configured clusters. Every store
//! mutation is routed to the owning cluster's controller as a trigger.

use crate::control::accessor::MetadataAccessor;
use crate::control::admin::{AdminCommandProcessor, AdminResponse};
use crate::control::api::{Acknowledgment, InstanceConfig};
use crate::control::placement::calculate_ideal_state;
use crate::control::store::{ChangeKind, InMemoryStore, MetadataStore, StoreChange};
use crate::core::config::{ClusterConfig, Config};
use crate::core::error::{StewardError, StewardResult};
use crate::ops::audit::AuditLog;
use crate::ops::observability::ControllerMetrics;
use crate::pipeline::controller::{ControllerManager, ControllerStatus, TriggerHandle};
use crate::pipeline::event::TriggerKind;
use crate::pipeline::stage::StageContext;
use anyhow::{Context, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Component health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentHealth {
    /// Component is starting.
    Starting,
    /// Component is healthy and operational.
    Healthy,
    /// Component is degraded but functional.
    Degraded,
    /// Component has failed.
    Failed,
    /// Component is stopping.
    Stopping,
    /// Component has stopped.
    Stopped,
}

/// Health status aggregated from all components.
#[derive(Debug, Clone)]
pub struct RuntimeHealth {
    /// Metadata store health.
    pub store: ComponentHealth,
    /// Cluster controller health.
    pub controllers: ComponentHealth,
    /// Change router health.
    pub router: ComponentHealth,
}

impl Default for RuntimeHealth {
    fn default() -> Self {
        Self {
            store: ComponentHealth::Starting,
            controllers: ComponentHealth::Starting,
            router: ComponentHealth::Starting,
        }
    }
}

impl RuntimeHealth {
    /// Check if the runtime is reconciling.
    pub fn is_ready(&self) -> bool {
        matches!(
            (self.store, self.controllers, self.router),
            (
                ComponentHealth::Healthy,
                ComponentHealth::Healthy,
                ComponentHealth::Healthy | ComponentHealth::Degraded
            )
        )
    }

    /// Check if the runtime is alive (not failed).
    pub fn is_alive(&self) -> bool {
        !matches!(
            (self.store, self.controllers, self.router),
            (ComponentHealth::Failed, _, _)
                | (_, ComponentHealth::Failed, _)
                | (_, _, ComponentHealth::Failed)
        )
    }
}

/// Steward runtime holding all component handles.
pub struct Runtime {
    /// Configuration.
    config: Arc<Config>,

    /// Embedded metadata store.
    store: Arc<InMemoryStore>,

    /// Shared controller metrics.
    metrics: Arc<ControllerMetrics>,

    /// Administrative audit log.
    audit: Arc<AuditLog>,

    /// One controller per cluster.
    controllers: ControllerManager,

    /// Runtime health status.
    health: RuntimeHealth,

    /// Whether the runtime is running.
    running: Arc<AtomicBool>,

    /// Shutdown signal sender.
    shutdown_tx: watch::Sender<bool>,

    /// Shutdown signal receiver.
    shutdown_rx: watch::Receiver<bool>,

    /// Store change router task.
    router_handle: Option<JoinHandle<()>>,

    /// Periodic rebalance task.
    ticker_handle: Option<JoinHandle<()>>,
}

impl Runtime {
    /// Create a new runtime with the given configuration.
    pub fn new(config: Config) -> Result<Self> {
        config.validate().context("invalid configuration")?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let audit = AuditLog::new((&config.audit).into());

        Ok(Self {
            config: Arc::new(config),
            store: Arc::new(InMemoryStore::new()),
            metrics: Arc::new(ControllerMetrics::new()),
            audit: Arc::new(audit),
            controllers: ControllerManager::new(),
            health: RuntimeHealth::default(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
            shutdown_rx,
            router_handle: None,
            ticker_handle: None,
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the embedded metadata store.
    pub fn store(&self) -> &Arc<InMemoryStore> {
        &self.store
    }

    /// Get the shared metrics.
    pub fn metrics(&self) -> &Arc<ControllerMetrics> {
        &self.metrics
    }

    /// Get the audit log.
    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Typed store access for one cluster.
    pub fn accessor(&self, cluster: &str) -> MetadataAccessor {
        MetadataAccessor::new(self.store.clone() as Arc<dyn MetadataStore>, cluster)
    }

    /// Get the current health status.
    pub fn health(&self) -> &RuntimeHealth {
        &self.health
    }

    /// Check if the runtime is reconciling.
    pub fn is_ready(&self) -> bool {
        self.health.is_ready()
    }

    /// Check if the runtime is alive.
    pub fn is_alive(&self) -> bool {
        self.health.is_alive()
    }

    /// Check if the runtime is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Get a shutdown receiver for graceful shutdown coordination.
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_rx.clone()
    }

    /// Status of every cluster controller.
    pub fn statuses(&self) -> Vec<ControllerStatus> {
        self.controllers.statuses()
    }

    /// Controllers owned by this runtime.
    pub fn controllers(&self) -> &ControllerManager {
        &self.controllers
    }

    /// Initialize and start all runtime components.
    ///
    /// Components are started in order:
    /// 1. Metadata store (seeded from `[[clusters]]`)
    /// 2. Cluster controllers
    /// 3. Store change router
    /// 4. Periodic rebalance ticker
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!(
            controller = %self.config.controller.name,
            version = %self.config.controller.effective_version(),
            clusters = self.config.clusters.len(),
            "starting Steward runtime"
        );

        self.init_store()?;
        let changes = self.store.subscribe();
        self.start_controllers();
        self.start_router(changes);
        self.start_ticker();

        self.running.store(true, Ordering::Release);
        self.controllers.trigger_all(TriggerKind::ConfigChange);
        tracing::info!("Steward runtime started");

        Ok(())
    }

    /// Seed the embedded store.
    fn init_store(&mut self) -> Result<()> {
        tracing::debug!("seeding metadata store");

        for cluster in &self.config.clusters {
            let accessor = self.accessor(&cluster.name);
            seed_cluster(&accessor, cluster)
                .with_context(|| format!("failed to seed cluster {}", cluster.name))?;
        }
        self.health.store = ComponentHealth::Healthy;

        tracing::info!(records = self.store.len(), "metadata store seeded");
        Ok(())
    }

    /// Start one controller per configured cluster.
    fn start_controllers(&mut self) {
        tracing::debug!("starting cluster controllers");

        let settings = self.config.pipeline_settings();
        for cluster in &self.config.clusters {
            let context = StageContext::new(
                self.accessor(&cluster.name),
                settings.clone(),
                self.metrics.clone(),
            );
            self.controllers.start(context);
        }
        self.health.controllers = ComponentHealth::Healthy;

        tracing::info!(
            clusters = self.controllers.len(),
            tie_break = %settings.leader_tie_break,
            "cluster controllers started"
        );
    }

    /// Route store changes to the owning controller.
    fn start_router(&mut self, mut changes: mpsc::UnboundedReceiver<StoreChange>) {
        tracing::debug!("starting change router");

        let handles = self.controllers.handles();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    change = changes.recv() => match change {
                        Some(change) => route_change(&handles, &change),
                        None => break,
                    },
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!("change router stopped");
        });

        self.router_handle = Some(handle);
        self.health.router = ComponentHealth::Healthy;
        tracing::info!("change router started");
    }

    /// Emit periodic rebalance triggers.
    fn start_ticker(&mut self) {
        let interval_ms = self.config.controller.rebalance_interval_ms;
        if interval_ms == 0 {
            tracing::info!("periodic rebalance disabled");
            return;
        }

        let handles = self.controllers.handles();
        let mut shutdown_rx = self.shutdown_rx.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(interval_ms));
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        for handle in handles.values() {
                            handle.trigger(TriggerKind::Periodic);
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });

        self.ticker_handle = Some(handle);
        tracing::info!(interval_ms, "periodic rebalance started");
    }

    /// Apply an administrative command body to one instance.
    ///
    /// A successful command triggers a run for the cluster.
    pub fn handle_admin(&self, cluster: &str, instance: &str, body: &str) -> AdminResponse {
        let processor = AdminCommandProcessor::new(self.accessor(cluster), self.audit.clone());
        let response = processor.handle(instance, body);
        if !response.is_error() {
            self.controllers.trigger(cluster, TriggerKind::AdminCommand);
        }
        response
    }

    /// Retire an acknowledged instruction.
    pub fn acknowledge(&self, cluster: &str, ack: &Acknowledgment) -> StewardResult<bool> {
        let controller = self.controllers.get(cluster).ok_or_else(|| {
            StewardError::invalid_request(format!("no controller for cluster {}", cluster))
        })?;
        controller.acknowledge(ack)
    }

    /// Trigger graceful shutdown.
    pub fn shutdown(&self) {
        tracing::info!("shutdown requested");
        let _ = self.shutdown_tx.send(true);
    }

    /// Wait for shutdown signal.
    pub async fn wait_for_shutdown(&mut self) {
        let mut rx = self.shutdown_rx.clone();
        while !*rx.borrow() {
            if rx.changed().await.is_err() {
                break;
            }
        }
    }

    /// Run the runtime until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;

        let mut shutdown_rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
            }
            _ = async {
                while !*shutdown_rx.borrow() {
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
            } => {
                tracing::info!("shutdown requested by component");
            }
        }

        self.stop().await?;
        Ok(())
    }

    /// Stop all runtime components.
    ///
    /// Background tasks stop first so nothing triggers a controller that is
    /// shutting down. Controllers finish any in-flight run.
    pub async fn stop(&mut self) -> Result<()> {
        tracing::info!("stopping Steward runtime");
        self.running.store(false, Ordering::Release);

        // Signal shutdown to all components
        let _ = self.shutdown_tx.send(true);

        self.health.router = ComponentHealth::Stopping;
        for handle in [self.ticker_handle.take(), self.router_handle.take()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "background task panicked");
            }
        }
        self.health.router = ComponentHealth::Stopped;

        self.health.controllers = ComponentHealth::Stopping;
        self.controllers.shutdown_all().await;
        self.health.controllers = ComponentHealth::Stopped;
        self.health.store = ComponentHealth::Stopped;

        tracing::info!("Steward runtime stopped");
        Ok(())
    }

    /// Start the runtime for tests (without signal handling or the ticker).
    pub async fn start_for_tests(&mut self) -> Result<()> {
        self.init_store()?;
        let changes = self.store.subscribe();
        self.start_controllers();
        self.start_router(changes);
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    /// Stop the runtime for tests.
    pub async fn shutdown_for_tests(&mut self) -> Result<()> {
        self.stop().await
    }
}

/// Write a configured cluster's instance configs and desired states.
///
/// Records that already exist are left alone.
pub fn seed_cluster(accessor: &MetadataAccessor, cluster: &ClusterConfig) -> StewardResult<()> {
    for instance in &cluster.instances {
        if accessor.instance_config(instance)?.is_none() {
            accessor.put_instance_config(&InstanceConfig::new(instance.clone()))?;
        }
    }
    for resource in &cluster.resources {
        if accessor.desired_state(&resource.name)?.is_some() {
            continue;
        }
        let desired = calculate_ideal_state(
            &cluster.instances,
            resource.partitions,
            resource.replicas,
            &resource.name,
            &resource.state_model,
        );
        accessor.put_desired_state(&desired)?;
    }
    Ok(())
}

/// Map a store change to the trigger it raises.
pub fn trigger_for(kind: ChangeKind) -> Option<TriggerKind> {
    match kind {
        ChangeKind::LiveInstance => Some(TriggerKind::LiveInstanceChange),
        ChangeKind::InstanceConfig | ChangeKind::StateModel | ChangeKind::ErrorMarker => {
            Some(TriggerKind::ConfigChange)
        }
        ChangeKind::DesiredState => Some(TriggerKind::DesiredStateChange),
        ChangeKind::ObservedState => Some(TriggerKind::ObservedStateChange),
        ChangeKind::Instruction => Some(TriggerKind::InstructionChange),
        ChangeKind::Other => None,
    }
}

fn route_change(handles: &HashMap<String, TriggerHandle>, change: &StoreChange) {
    let Some(trigger) = trigger_for(change.kind) else {
        return;
    };
    match handles.get(&change.cluster) {
        Some(handle) => handle.trigger(trigger),
        None => tracing::trace!(
            cluster = %change.cluster,
            path = %change.path,
            "change for unmanaged cluster"
        ),
    }
}
