//! Audit logging for administrative mutations.
//!
//! Every operator command that reaches the command processor is recorded,
//! whether it changed metadata or was rejected.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

/// Audit event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventType {
    /// Instance enabled or disabled.
    InstanceEnablement,
    /// Partitions enabled or disabled on an instance.
    PartitionEnablement,
    /// Error markers cleared for named partitions.
    PartitionReset,
    /// Error markers cleared for whole instances.
    InstanceReset,
    /// Instance removed from cluster membership.
    InstanceDropped,
    /// Command could not be parsed or is not supported.
    CommandRejected,
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InstanceEnablement => write!(f, "instance.enablement"),
            Self::PartitionEnablement => write!(f, "partition.enablement"),
            Self::PartitionReset => write!(f, "partition.reset"),
            Self::InstanceReset => write!(f, "instance.reset"),
            Self::InstanceDropped => write!(f, "instance.dropped"),
            Self::CommandRejected => write!(f, "command.rejected"),
        }
    }
}

/// Audit result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditResult {
    /// Operation succeeded.
    Success,
    /// Operation failed.
    Failure,
}

impl std::fmt::Display for AuditResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::Failure => write!(f, "failure"),
        }
    }
}

/// Audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event ID, assigned by the log.
    pub event_id: u64,
    /// Event type.
    pub event_type: AuditEventType,
    /// Timestamp (RFC3339).
    pub timestamp: String,
    /// Cluster the command targeted.
    pub cluster: String,
    /// Instance the command targeted, if any.
    pub instance: Option<String>,
    /// Result.
    pub result: AuditResult,
    /// Additional details.
    pub details: Option<String>,
}

impl AuditEvent {
    /// Create a new successful audit event.
    pub fn new(event_type: AuditEventType, cluster: impl Into<String>) -> Self {
        Self {
            event_id: 0,
            event_type,
            timestamp: chrono::Utc::now().to_rfc3339(),
            cluster: cluster.into(),
            instance: None,
            result: AuditResult::Success,
            details: None,
        }
    }

    /// Set the target instance.
    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    /// Set result.
    pub fn with_result(mut self, result: AuditResult) -> Self {
        self.result = result;
        self
    }

    /// Set details.
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Format as JSON.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Audit log configuration.
#[derive(Debug, Clone)]
pub struct AuditLogConfig {
    /// Enable audit logging.
    pub enabled: bool,
    /// Maximum events in memory buffer.
    pub buffer_size: usize,
}

impl Default for AuditLogConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            buffer_size: 10_000,
        }
    }
}

/// Audit log statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuditLogStats {
    /// Total events logged.
    pub total_events: u64,
    /// Events with a failure result.
    pub failures: u64,
    /// Events evicted from the buffer.
    pub dropped_events: u64,
}

/// Bounded in-memory audit log.
#[derive(Debug)]
pub struct AuditLog {
    config: AuditLogConfig,
    buffer: RwLock<VecDeque<AuditEvent>>,
    next_event_id: AtomicU64,
    total_events: AtomicU64,
    failures: AtomicU64,
    dropped_events: AtomicU64,
}

impl AuditLog {
    /// Create a new audit log.
    pub fn new(config: AuditLogConfig) -> Self {
        Self {
            config,
            buffer: RwLock::new(VecDeque::new()),
            next_event_id: AtomicU64::new(1),
            total_events: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
        }
    }

    /// Log an audit event.
    pub fn log(&self, mut event: AuditEvent) {
        if !self.config.enabled {
            return;
        }

        event.event_id = self.next_event_id.fetch_add(1, Ordering::Relaxed);
        self.total_events.fetch_add(1, Ordering::Relaxed);
        if event.result == AuditResult::Failure {
            self.failures.fetch_add(1, Ordering::Relaxed);
        }

        tracing::debug!(
            event_type = %event.event_type,
            cluster = %event.cluster,
            instance = ?event.instance,
            result = %event.result,
            "audit"
        );

        let mut buffer = self.buffer.write();
        if buffer.len() >= self.config.buffer_size {
            buffer.pop_front();
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(event);
    }

    /// Get recent events, newest first.
    pub fn get_recent(&self, count: usize) -> Vec<AuditEvent> {
        self.buffer.read().iter().rev().take(count).cloned().collect()
    }

    /// Get events by type, newest first.
    pub fn get_by_type(&self, event_type: AuditEventType, count: usize) -> Vec<AuditEvent> {
        self.buffer
            .read()
            .iter()
            .rev()
            .filter(|e| e.event_type == event_type)
            .take(count)
            .cloned()
            .collect()
    }

    /// Get events targeting an instance, newest first.
    pub fn get_by_instance(&self, instance: &str, count: usize) -> Vec<AuditEvent> {
        self.buffer
            .read()
            .iter()
            .rev()
            .filter(|e| e.instance.as_deref() == Some(instance))
            .take(count)
            .cloned()
            .collect()
    }

    /// Get statistics.
    pub fn stats(&self) -> AuditLogStats {
        AuditLogStats {
            total_events: self.total_events.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            dropped_events: self.dropped_events.load(Ordering::Relaxed),
        }
    }
}

impl Default for AuditLog {
    fn default() -> Self {
        Self::new(AuditLogConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audit_event_builder() {
        let event = AuditEvent::new(AuditEventType::PartitionReset, "demo")
            .with_instance("localhost_0")
            .with_result(AuditResult::Failure)
            .with_details("no error marker");

        assert_eq!(event.instance.as_deref(), Some("localhost_0"));
        assert!(chrono::DateTime::parse_from_rfc3339(&event.timestamp).is_ok());
        assert!(event.to_json().contains("PartitionReset"));
    }

    #[test]
    fn test_audit_log_buffer_limit() {
        let log = AuditLog::new(AuditLogConfig {
            enabled: true,
            buffer_size: 2,
        });
        for _ in 0..3 {
            log.log(AuditEvent::new(AuditEventType::InstanceReset, "demo"));
        }

        let recent = log.get_recent(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].event_id, 3);
        assert_eq!(log.stats().dropped_events, 1);
    }

    #[test]
    fn test_audit_log_disabled() {
        let log = AuditLog::new(AuditLogConfig {
            enabled: false,
            buffer_size: 10,
        });
        log.log(AuditEvent::new(AuditEventType::InstanceDropped, "demo"));
        assert_eq!(log.stats().total_events, 0);
    }

    #[test]
    fn test_audit_log_filters() {
        let log = AuditLog::default();
        log.log(AuditEvent::new(AuditEventType::InstanceEnablement, "demo").with_instance("a"));
        log.log(
            AuditEvent::new(AuditEventType::CommandRejected, "demo")
                .with_instance("b")
                .with_result(AuditResult::Failure),
        );

        assert_eq!(log.get_by_instance("a", 10).len(), 1);
        assert_eq!(log.get_by_type(AuditEventType::CommandRejected, 10).len(), 1);
        assert_eq!(log.stats().failures, 1);
    }
}
