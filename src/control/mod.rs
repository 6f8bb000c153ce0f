//! Cluster metadata and the operations on it.
//!
//! - [`api`] - Metadata records (desired, live, config, observed, instructions)
//! - [`store`] - Hierarchical store interface and in-memory implementation
//! - [`accessor`] - Key layout and typed record access
//! - [`state_model`] - Replica state machines
//! - [`cache`] - Immutable per-run snapshot
//! - [`placement`] - Ideal-state layout and target assignment
//! - [`admin`] - Administrative commands
//!
//! # Sessions
//!
//! Participant liveness is session scoped. Observed state and instructions
//! carry the session they belong to, and anything tagged with a session other
//! than the participant's current one is ignored by the snapshot.

pub mod accessor;
pub mod admin;
pub mod api;
pub mod cache;
pub mod placement;
pub mod state_model;
pub mod store;
