//! Steward - cluster-management control plane.
//!
//! Steward continuously reconciles the desired placement of resource
//! partitions across a fleet of participant instances against the state those
//! participants report, and drives convergence by queuing state-transition
//! instructions that respect a pluggable replica state model.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │              Triggers (store changes, admin, ticks)             │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │            ClusterController (single flight per cluster)        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  ReadClusterData → CompatibilityCheck → Reconcile → Dispatch    │
//! └─────────────────────────────────────────────────────────────────┘
//!                                  │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Metadata store                           │
//! │   desired │ live │ configs │ observed │ instructions │ errors   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Module Organization
//!
//! ## Core
//! - [`core::config`] - Configuration parsing and validation
//! - [`core::runtime`] - Main runtime orchestration
//! - [`core::error`] - Error types
//!
//! ## Control
//! - [`control::api`] - Metadata records
//! - [`control::store`] - Store interface and in-memory store
//! - [`control::accessor`] - Typed record access and key layout
//! - [`control::state_model`] - Replica state machines
//! - [`control::cache`] - Per-run cluster snapshot
//! - [`control::placement`] - Ideal-state layout and target assignment
//! - [`control::admin`] - Administrative commands
//!
//! ## Pipeline
//! - [`pipeline::event`] - Per-run event and attributes
//! - [`pipeline::stage`] - Stage lifecycle
//! - [`pipeline::executor`] - Stage chain execution
//! - [`pipeline::compatibility`] - Version gate
//! - [`pipeline::reconcile`] - Instruction planning
//! - [`pipeline::dispatch`] - Instruction dispatch and acknowledgment
//! - [`pipeline::controller`] - Per-cluster trigger coalescing
//!
//! ## Operations
//! - [`ops::observability`] - Metrics registry and controller counters
//! - [`ops::version`] - Version compatibility
//! - [`ops::audit`] - Administrative audit log
//!
//! ## CLI
//! - [`cli::commands`] - CLI command implementations

// Core infrastructure
pub mod core;

// Metadata model, store access, and placement
pub mod control;

// Reconciliation pipeline
pub mod pipeline;

// Operations and observability
pub mod ops;

// CLI
pub mod cli;

// Re-exports for convenience
pub use self::core::{config, error, runtime};
pub use control::{admin, cache, placement, state_model, store};
pub use ops::{audit, observability, version};
