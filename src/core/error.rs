//! Error types for the controller.
//!
//! Failures are scoped the way a pipeline run treats them: metadata reads and
//! version checks abort the whole run, per-partition planning failures are
//! recorded and skipped, and dispatch failures are reported and left for the
//! next triggered run to supersede.

use thiserror::Error;

/// Common steward error conditions.
#[derive(Debug, Error)]
pub enum StewardError {
    /// Backing metadata store is unreachable. Transient; the next trigger retries.
    #[error("metadata unavailable: {message}")]
    MetadataUnavailable { message: String },

    /// Controller and at least one live participant disagree on major.minor.
    #[error(
        "incompatible version: controller {}, participants [{}]",
        controller_version.as_deref().unwrap_or("<absent>"),
        instances.join(", ")
    )]
    IncompatibleVersion {
        controller_version: Option<String>,
        instances: Vec<String>,
    },

    /// Operator issued a command outside the recognized set.
    #[error("unsupported command: {command}. Should be one of [{}]", valid.join(", "))]
    UnsupportedCommand {
        command: String,
        valid: Vec<&'static str>,
    },

    /// No legal next hop exists from the observed label toward the target.
    #[error(
        "stuck transition: {instance} {resource}/{partition} cannot move {from_state} -> {to_state}"
    )]
    StuckTransition {
        instance: String,
        resource: String,
        partition: String,
        from_state: String,
        to_state: String,
    },

    /// Writing to one or more instruction queues failed.
    #[error("dispatch failure: {failed} instruction(s) not written: {message}")]
    DispatchFailure { failed: usize, message: String },

    /// Instance is not a member of the cluster.
    #[error("instance {instance} not found in cluster {cluster}")]
    InstanceNotFound { cluster: String, instance: String },

    /// Resource has no desired state in the cluster.
    #[error("resource {resource} not found in cluster {cluster}")]
    ResourceNotFound { cluster: String, resource: String },

    /// Malformed request or parameter.
    #[error("invalid request: {message}")]
    InvalidRequest { message: String },

    /// A stage ran without the event attribute it depends on.
    #[error("missing event attribute: {name}")]
    MissingAttribute { name: &'static str },

    /// Record could not be encoded or decoded.
    #[error("serialization error at {path}: {message}")]
    Serialization { path: String, message: String },

    /// Internal error.
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl StewardError {
    /// Create a MetadataUnavailable error.
    pub fn metadata_unavailable(message: impl Into<String>) -> Self {
        Self::MetadataUnavailable {
            message: message.into(),
        }
    }

    /// Create an InvalidRequest error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Create an Internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Check if the condition clears on its own and a later run may succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::MetadataUnavailable { .. } | Self::DispatchFailure { .. }
        )
    }

    /// Check if this error aborts an entire pipeline run rather than one partition.
    pub fn is_run_scoped(&self) -> bool {
        !matches!(self, Self::StuckTransition { .. })
    }

    /// Short stable identifier used in metrics and audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MetadataUnavailable { .. } => "MetadataUnavailable",
            Self::IncompatibleVersion { .. } => "IncompatibleVersion",
            Self::UnsupportedCommand { .. } => "UnsupportedCommand",
            Self::StuckTransition { .. } => "StuckTransition",
            Self::DispatchFailure { .. } => "DispatchFailure",
            Self::InstanceNotFound { .. } => "InstanceNotFound",
            Self::ResourceNotFound { .. } => "ResourceNotFound",
            Self::InvalidRequest { .. } => "InvalidRequest",
            Self::MissingAttribute { .. } => "MissingAttribute",
            Self::Serialization { .. } => "Serialization",
            Self::Internal { .. } => "Internal",
        }
    }
}

/// Result type using StewardError.
pub type StewardResult<T> = Result<T, StewardError>;
