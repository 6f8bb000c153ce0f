//! Operations module integration tests.
//!
//! Tests for metrics, audit, and version gates.

mod common;

use common::{cluster_config, TestCluster, CLUSTER, RESOURCE};
use steward::control::state_model::MASTER_SLAVE;
use steward::ops::audit::{AuditEvent, AuditEventType, AuditLog, AuditLogConfig, AuditResult};
use steward::ops::observability::{metrics, ControllerMetrics, MetricsRegistry};
use steward::ops::version::{CompatibilityCheck, VersionInfo};

// ============================================================================
// MetricsRegistry Tests
// ============================================================================

#[test]
fn metrics_registry_counters() {
    let registry = MetricsRegistry::new();

    registry.counter_inc("runs");
    registry.counter_inc("runs");
    registry.counter_add("runs", 3);

    assert_eq!(registry.counter_get("runs"), 5);
    assert_eq!(registry.counter_get("missing"), 0);
}

#[test]
fn metrics_registry_gauges_saturate() {
    let registry = MetricsRegistry::new();

    registry.gauge_inc("active");
    registry.gauge_inc("active");
    registry.gauge_dec("active");
    assert_eq!(registry.gauge_get("active"), 1);

    registry.gauge_dec("active");
    registry.gauge_dec("active");
    assert_eq!(registry.gauge_get("active"), 0);

    registry.gauge_set("active", 7);
    assert_eq!(registry.gauge_get("active"), 7);
}

#[test]
fn metrics_registry_histograms() {
    let registry = MetricsRegistry::new();
    assert!(registry.histogram_get("latency").is_none());

    for value in [2.0, 4.0, 9.0] {
        registry.histogram_observe("latency", value);
    }

    let snapshot = registry.histogram_get("latency").unwrap();
    assert_eq!(snapshot.count, 3);
    assert_eq!(snapshot.min, 2.0);
    assert_eq!(snapshot.max, 9.0);
    assert!((snapshot.mean() - 5.0).abs() < f64::EPSILON);
}

#[test]
fn prometheus_export_uses_underscored_names() {
    let metrics = ControllerMetrics::new();
    metrics.record_run_started();
    metrics.record_run_aborted("Reconcile", 1.5);
    metrics.controller_started();

    let output = metrics.export();
    assert!(output.contains("# TYPE steward_pipeline_runs_started counter\nsteward_pipeline_runs_started 1\n"));
    assert!(output.contains("steward_pipeline_runs_aborted_Reconcile 1"));
    assert!(output.contains("# TYPE steward_controller_active gauge"));
    assert!(output.contains("steward_pipeline_run_duration_ms_count 1"));
    assert!(!output.contains("steward.pipeline"));
}

#[test]
fn pipeline_runs_feed_controller_metrics() {
    let cluster = TestCluster::connected(&cluster_config(3, 3, 2, MASTER_SLAVE));
    cluster.run_plan();
    cluster.run_plan();

    let registry = cluster.metrics.registry();
    assert_eq!(registry.counter_get(metrics::RUNS_STARTED), 2);
    assert_eq!(registry.counter_get(metrics::RUNS_COMPLETED), 2);
    assert_eq!(registry.counter_get(metrics::RUNS_ABORTED), 0);
    // Three partitions, two replicas each, all heading to SLAVE first.
    assert_eq!(registry.counter_get(metrics::INSTRUCTIONS_DISPATCHED), 6);
    assert_eq!(registry.histogram_get(metrics::RUN_DURATION_MS).unwrap().count, 2);
}

// ============================================================================
// AuditLog Tests
// ============================================================================

#[test]
fn audit_log_defaults() {
    let config = AuditLogConfig::default();
    assert!(config.enabled);
    assert_eq!(config.buffer_size, 10_000);
}

#[test]
fn audit_log_evicts_oldest() {
    let log = AuditLog::new(AuditLogConfig {
        enabled: true,
        buffer_size: 3,
    });
    for i in 0..5 {
        log.log(
            AuditEvent::new(AuditEventType::PartitionEnablement, CLUSTER)
                .with_instance(format!("localhost_{}", i)),
        );
    }

    let recent = log.get_recent(10);
    let instances: Vec<_> = recent.iter().filter_map(|e| e.instance.as_deref()).collect();
    assert_eq!(instances, vec!["localhost_4", "localhost_3", "localhost_2"]);

    let stats = log.stats();
    assert_eq!(stats.total_events, 5);
    assert_eq!(stats.dropped_events, 2);
    assert_eq!(stats.failures, 0);
}

#[test]
fn audit_events_are_numbered_in_order() {
    let log = AuditLog::default();
    log.log(AuditEvent::new(AuditEventType::InstanceReset, CLUSTER));
    log.log(
        AuditEvent::new(AuditEventType::InstanceDropped, CLUSTER)
            .with_result(AuditResult::Failure)
            .with_details("instance is live"),
    );

    let recent = log.get_recent(2);
    assert_eq!(recent[0].event_id, 2);
    assert_eq!(recent[1].event_id, 1);
    assert_eq!(recent[0].result.to_string(), "failure");
    assert_eq!(recent[0].event_type.to_string(), "instance.dropped");
    assert_eq!(log.stats().failures, 1);
}

#[test]
fn audit_event_serializes_target() {
    let event = AuditEvent::new(AuditEventType::PartitionReset, CLUSTER)
        .with_instance("localhost_12918")
        .with_details(format!("{} [{}_0]", RESOURCE, RESOURCE));
    let json: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();

    assert_eq!(json["cluster"], CLUSTER);
    assert_eq!(json["instance"], "localhost_12918");
    assert_eq!(json["result"], "Success");
}

// ============================================================================
// Version Tests
// ============================================================================

#[test]
fn version_ordering_and_display() {
    let a = VersionInfo::parse("1.2.9").unwrap();
    let b = VersionInfo::parse("1.10.0").unwrap();
    assert!(a < b);
    assert_eq!(b.to_string(), "1.10.0");
    assert!(a.is_compatible_with(&VersionInfo::new(1, 2, 0)));
    assert!(!a.is_compatible_with(&b));
}

#[test]
fn compatibility_ignores_patch() {
    let cases = [
        (Some("1.2.0"), Some("1.2.7"), true),
        (Some("1.2.0"), Some("1.3.0"), false),
        (Some("1.2.0"), Some("2.2.0"), false),
        (Some("1.2.0"), Some("not-a-version"), true),
        (Some("+1.2.0"), Some("1.2.0"), false),
        (Some("1.2.0"), Some("1.+2.0"), true),
        (Some("1.2"), None, false),
        (None, None, false),
    ];
    for (controller, participant, expected) in cases {
        let check = CompatibilityCheck::check(controller, participant);
        assert_eq!(
            check.compatible, expected,
            "controller {:?} participant {:?}",
            controller, participant
        );
    }
}

#[test]
fn incompatible_reason_names_both_versions() {
    let check = CompatibilityCheck::check(Some("1.2.0"), Some("1.3.1"));
    let reason = check.reason.unwrap();
    assert!(reason.contains("1.2.0"));
    assert!(reason.contains("1.3.1"));
}
