//! Operations and observability.
//!
//! This module handles operational concerns:
//! - [`version`] - Version parsing and compatibility checking
//! - [`observability`] - Metrics registry and controller counters
//! - [`audit`] - Administrative audit logging

pub mod audit;
pub mod observability;
pub mod version;
