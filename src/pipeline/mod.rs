//! Reconciliation pipeline.
//!
//! Every trigger becomes one [`event::ClusterEvent`] run through an ordered
//! stage chain:
//!
//! 1. [`read::ReadClusterDataStage`] snapshots the cluster.
//! 2. [`compatibility::CompatibilityCheckStage`] gates on versions.
//! 3. [`reconcile::ReconcileStage`] plans single-hop instructions.
//! 4. [`dispatch::DispatchStage`] writes them to participant queues.
//!
//! A [`controller::ClusterController`] owns one cluster's pipeline and
//! guarantees at most one run in flight per cluster.

pub mod compatibility;
pub mod controller;
pub mod dispatch;
pub mod event;
pub mod executor;
pub mod read;
pub mod reconcile;
pub mod stage;
