//! Control plane metadata tests.

mod common;

use common::{cluster_config, TestCluster, RESOURCE};
use std::sync::Arc;
use steward::control::admin::AdminCommandProcessor;
use steward::control::api::{ErrorMarkers, Instruction, ObservedState, SessionId};
use steward::control::cache::ClusterDataCache;
use steward::control::placement::{calculate_ideal_state, LeaderTieBreak, PartitionAssignment};
use steward::control::state_model::{StateBound, StateModelDefinition, MASTER_SLAVE};
use steward::control::store::{ChangeKind, InMemoryStore, MetadataStore};
use steward::core::error::StewardError;
use steward::ops::audit::{AuditEventType, AuditLog, AuditLogConfig, AuditResult};

fn instance(i: usize) -> String {
    format!("localhost_{}", 12918 + i)
}

fn partition(p: usize) -> String {
    format!("{}_{}", RESOURCE, p)
}

fn processor(cluster: &TestCluster) -> AdminCommandProcessor {
    AdminCommandProcessor::new(
        cluster.accessor.clone(),
        Arc::new(AuditLog::new(AuditLogConfig::default())),
    )
}

fn mark_error(cluster: &TestCluster, instance: &str, partition: &str) {
    let mut observed = cluster
        .accessor
        .observed_state(instance, RESOURCE)
        .unwrap()
        .unwrap_or_else(|| ObservedState::new(instance, RESOURCE));
    observed.set(partition, "ERROR", cluster.session(instance));
    cluster.accessor.put_observed_state(&observed).unwrap();
}

// ============================================================================
// Store notifications
// ============================================================================

#[test]
fn store_publishes_classified_changes() {
    let store = InMemoryStore::new();
    let mut changes = store.subscribe();

    store.set("/c1/LIVEINSTANCES/a", b"{}".to_vec()).unwrap();
    store.set("/c1/INSTANCES/a/MESSAGES/m1", b"{}".to_vec()).unwrap();
    store.remove("/c1/INSTANCES/a").unwrap();
    // Removing nothing publishes nothing.
    store.remove("/c1/INSTANCES/a").unwrap();

    let first = changes.try_recv().unwrap();
    assert_eq!(first.cluster, "c1");
    assert_eq!(first.kind, ChangeKind::LiveInstance);
    assert_eq!(changes.try_recv().unwrap().kind, ChangeKind::Instruction);
    assert_eq!(changes.try_recv().unwrap().kind, ChangeKind::Other);
    assert!(changes.try_recv().is_err());
}

#[test]
fn malformed_record_is_a_serialization_error() {
    let cluster = TestCluster::new(&cluster_config(1, 1, 1, MASTER_SLAVE));
    let path = cluster.accessor.keys().desired_state(RESOURCE);
    cluster.store.set(&path, b"not json".to_vec()).unwrap();

    match cluster.accessor.desired_state(RESOURCE) {
        Err(StewardError::Serialization { path: at, .. }) => assert_eq!(at, path),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn removing_an_instance_drops_its_subtree() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    cluster.run_plan();
    assert!(!cluster.accessor.instructions(&instance(0)).unwrap().is_empty());

    assert!(cluster.accessor.remove_instance(&instance(0)).unwrap());
    assert!(cluster.accessor.instance_config(&instance(0)).unwrap().is_none());
    assert!(cluster.accessor.instructions(&instance(0)).unwrap().is_empty());
    assert!(cluster.accessor.instance_config(&instance(1)).unwrap().is_some());
}

// ============================================================================
// Snapshot
// ============================================================================

#[test]
fn oldest_duplicate_instruction_wins() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let session = cluster.session(&instance(0));

    let older = Instruction::new(
        instance(0),
        RESOURCE,
        partition(0),
        ("OFFLINE".to_string(), "SLAVE".to_string()),
        session.clone(),
        MASTER_SLAVE,
    );
    let mut newer = Instruction::new(
        instance(0),
        RESOURCE,
        partition(0),
        ("SLAVE".to_string(), "MASTER".to_string()),
        session,
        MASTER_SLAVE,
    );
    newer.created_at = older.created_at + chrono::Duration::seconds(5);
    cluster.accessor.put_instruction(&newer).unwrap();
    cluster.accessor.put_instruction(&older).unwrap();

    let cache = ClusterDataCache::load(&cluster.accessor).unwrap();
    let pending = cache
        .pending_instruction(&instance(0), RESOURCE, &partition(0))
        .unwrap();
    assert_eq!(pending.id, older.id);
    assert_eq!(cache.pending_instructions().count(), 1);
    assert!(cache.stale_instructions().is_empty());
}

#[test]
fn instructions_for_disconnected_instances_are_stale() {
    let mut cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    cluster.run_plan();
    cluster.disconnect(&instance(0));

    let cache = ClusterDataCache::load(&cluster.accessor).unwrap();
    assert!(!cache.is_live(&instance(0)));
    assert_eq!(cache.stale_instructions().len(), 1);
    assert_eq!(cache.stale_instructions()[0].instance, instance(0));
    assert_eq!(cache.pending_instructions().count(), 1);
}

#[test]
fn error_markers_load_per_partition() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let mut markers = ErrorMarkers::new(RESOURCE);
    markers.partitions.insert(partition(1));
    cluster.accessor.put_error_markers(&instance(1), &markers).unwrap();

    let cache = ClusterDataCache::load(&cluster.accessor).unwrap();
    assert!(cache.has_error_marker(&instance(1), RESOURCE, &partition(1)));
    assert!(!cache.has_error_marker(&instance(1), RESOURCE, &partition(0)));
    assert!(cache.error_markers(&instance(0), RESOURCE).is_none());
}

#[test]
fn stored_state_models_extend_builtins() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let custom = StateModelDefinition::new(
        "Primary",
        "IDLE",
        &["PRIMARY", "IDLE", "DROPPED"],
        &[("IDLE", "PRIMARY"), ("PRIMARY", "IDLE"), ("IDLE", "DROPPED")],
    )
    .with_bound("PRIMARY", StateBound::Fixed(1));
    let broken = StateModelDefinition::new(MASTER_SLAVE, "NOWHERE", &["MASTER"], &[]);
    cluster.accessor.put_state_model(&custom).unwrap();
    cluster.accessor.put_state_model(&broken).unwrap();

    let cache = ClusterDataCache::load(&cluster.accessor).unwrap();
    assert_eq!(cache.state_model("Primary"), Some(&custom));
    // The invalid override is ignored in favour of the built-in.
    assert_eq!(
        cache.state_model(MASTER_SLAVE),
        Some(&StateModelDefinition::master_slave())
    );
}

#[test]
fn custom_state_model_drives_placement() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let custom = StateModelDefinition::new(
        "Primary",
        "IDLE",
        &["PRIMARY", "IDLE", "DROPPED"],
        &[("IDLE", "PRIMARY"), ("PRIMARY", "IDLE"), ("IDLE", "DROPPED")],
    )
    .with_bound("PRIMARY", StateBound::Fixed(1));
    cluster.accessor.put_state_model(&custom).unwrap();

    let mut desired = cluster.accessor.desired_state(RESOURCE).unwrap().unwrap();
    desired.state_model = "Primary".to_string();
    cluster.accessor.put_desired_state(&desired).unwrap();

    let plan = cluster.run_plan();
    assert_eq!(plan.instructions.len(), 2);
    assert!(plan
        .instructions
        .iter()
        .all(|i| i.from_state == "IDLE" && i.to_state == "PRIMARY" && i.state_model == "Primary"));
}

// ============================================================================
// Placement
// ============================================================================

#[test]
fn ideal_state_covers_every_partition() {
    let instances: Vec<String> = (0..3).map(instance).collect();
    let desired = calculate_ideal_state(&instances, 4, 2, RESOURCE, MASTER_SLAVE);

    assert_eq!(desired.partition_count, 4);
    assert_eq!(desired.replicas, 2);
    assert_eq!(
        desired.preference_list(&partition(3)).unwrap(),
        &[instance(0), instance(1), instance(2)]
    );
}

#[test]
fn assignment_skips_ineligible_instances() {
    let mut cluster = TestCluster::connected(&cluster_config(4, 1, 2, MASTER_SLAVE));
    cluster.disconnect(&instance(0));
    cluster
        .accessor
        .update_instance_config(&instance(1), |c| c.enabled = false)
        .unwrap();
    let mut markers = ErrorMarkers::new(RESOURCE);
    markers.partitions.insert(partition(0));
    cluster.accessor.put_error_markers(&instance(2), &markers).unwrap();

    let cache = ClusterDataCache::load(&cluster.accessor).unwrap();
    let desired = cache.desired_state(RESOURCE).unwrap();
    let model = StateModelDefinition::master_slave();
    let assignment = PartitionAssignment::compute(
        &cache,
        desired,
        &model,
        &partition(0),
        LeaderTieBreak::PreferenceOrder,
    );

    assert_eq!(assignment.eligible, vec![instance(3)]);
    assert_eq!(assignment.state_of(&instance(3)), Some("MASTER"));
    assert_eq!(assignment.count("SLAVE"), 0);
    assert_eq!(assignment.rank(&instance(0)), usize::MAX);
}

// ============================================================================
// Administrative commands
// ============================================================================

#[test]
fn enable_instance_round_trips_through_representation() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let admin = processor(&cluster);

    let response = admin.handle(&instance(0), r#"{"command":"enableInstance","enabled":"FALSE"}"#);
    assert_eq!(response.status, 200);
    assert!(!response.is_error());
    assert_eq!(response.body["enabled"], serde_json::json!(false));

    let get = admin.handle_get(&instance(0));
    assert_eq!(get.body["instance"], serde_json::json!(instance(0)));
    assert_eq!(get.body["enabled"], serde_json::json!(false));
}

#[test]
fn enabled_flag_must_be_true_or_false() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let admin = processor(&cluster);

    let response = admin.handle(&instance(0), r#"{"command":"enableInstance","enabled":"yes"}"#);
    assert!(response.is_error());
    assert!(response.body["ERROR"].as_str().unwrap().contains("'yes'"));
    let config = cluster.accessor.instance_config(&instance(0)).unwrap().unwrap();
    assert!(config.enabled);
}

#[test]
fn enable_partition_toggles_marker() {
    let cluster = TestCluster::connected(&cluster_config(2, 3, 1, MASTER_SLAVE));
    let admin = processor(&cluster);

    admin
        .enable_partition(false, &instance(0), RESOURCE, &[partition(0), partition(2)])
        .unwrap();
    let config = cluster.accessor.instance_config(&instance(0)).unwrap().unwrap();
    assert!(!config.is_eligible(RESOURCE, &partition(0)));
    assert!(config.is_eligible(RESOURCE, &partition(1)));
    assert!(!config.is_eligible(RESOURCE, &partition(2)));

    let config = admin
        .enable_partition(true, &instance(0), RESOURCE, &[partition(0), partition(2)])
        .unwrap();
    assert!(config.disabled_partitions.is_empty());
}

#[test]
fn enable_partition_requires_known_resource() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let response = processor(&cluster).handle(
        &instance(0),
        r#"{"command":"enablePartition","enabled":"false","resource":"nope","partition":"nope_0"}"#,
    );
    assert_eq!(response.status, 200);
    assert!(response.is_error());
    assert!(response.body["ERROR"]
        .as_str()
        .unwrap()
        .contains("resource nope not found"));
}

#[test]
fn unknown_instance_is_reported() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let err = processor(&cluster).enable_instance("ghost_1", true).unwrap_err();
    assert!(matches!(err, StewardError::InstanceNotFound { .. }));
}

#[test]
fn unsupported_command_lists_every_command() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let admin = processor(&cluster);
    let response = admin.handle(&instance(0), r#"{"command":"drain"}"#);

    assert!(response.is_error());
    assert_eq!(
        response.body["ERROR"],
        serde_json::json!(
            "unsupported command: drain. Should be one of [enableInstance, enablePartition, resetPartition, resetInstance]"
        )
    );
    let rejected = admin.audit().get_by_type(AuditEventType::CommandRejected, 10);
    assert_eq!(rejected.len(), 1);
    assert_eq!(rejected[0].result, AuditResult::Failure);
}

#[test]
fn reset_partition_refuses_healthy_partitions() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    cluster.converge(10);
    mark_error(&cluster, &instance(0), &partition(0));

    let admin = processor(&cluster);
    let err = admin
        .reset_partition(&instance(0), RESOURCE, &[partition(0), partition(1)])
        .unwrap_err();
    assert!(err.to_string().contains("not in ERROR state"));
    assert!(err.to_string().contains(&partition(1)));
    // Nothing was changed.
    assert_eq!(cluster.observed(&instance(0), &partition(0)).as_deref(), Some("ERROR"));

    admin.reset_partition(&instance(0), RESOURCE, &[partition(0)]).unwrap();
    assert_eq!(cluster.observed(&instance(0), &partition(0)).as_deref(), Some("OFFLINE"));
}

#[test]
fn reset_partition_clears_markers_without_error_label() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let mut markers = ErrorMarkers::new(RESOURCE);
    markers.partitions.insert(partition(0));
    markers.partitions.insert(partition(1));
    cluster.accessor.put_error_markers(&instance(0), &markers).unwrap();

    processor(&cluster)
        .reset_partition(&instance(0), RESOURCE, &[partition(0)])
        .unwrap();
    let remaining = cluster.accessor.error_marker(&instance(0), RESOURCE).unwrap().unwrap();
    assert_eq!(remaining.partitions.len(), 1);
    assert!(remaining.partitions.contains(&partition(1)));
}

#[test]
fn reset_instance_clears_everything() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    cluster.converge(10);
    mark_error(&cluster, &instance(0), &partition(0));
    let mut markers = ErrorMarkers::new(RESOURCE);
    markers.partitions.insert(partition(0));
    cluster.accessor.put_error_markers(&instance(0), &markers).unwrap();

    let response = processor(&cluster).handle(&instance(0), r#"{"command":"resetInstance"}"#);
    assert!(!response.is_error(), "{:?}", response.body);

    assert!(cluster.accessor.error_markers(&instance(0)).unwrap().is_empty());
    assert_eq!(cluster.observed(&instance(0), &partition(0)).as_deref(), Some("OFFLINE"));
}

#[test]
fn reset_instance_checks_every_name_before_clearing() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let mut markers = ErrorMarkers::new(RESOURCE);
    markers.partitions.insert(partition(0));
    cluster.accessor.put_error_markers(&instance(0), &markers).unwrap();
    let admin = processor(&cluster);

    let err = admin
        .reset_instance(&[instance(0), "localhost_1".to_string()])
        .unwrap_err();
    assert!(matches!(err, StewardError::InstanceNotFound { ref instance, .. } if instance == "localhost_1"));
    assert_eq!(cluster.accessor.error_markers(&instance(0)).unwrap().len(), 1);

    admin.reset_instance(&[instance(0), instance(1)]).unwrap();
    assert!(cluster.accessor.error_markers(&instance(0)).unwrap().is_empty());

    let events = admin.audit().get_by_type(AuditEventType::InstanceReset, 10);
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].instance.as_deref(), Some("localhost_12918,localhost_12919"));
    assert_eq!(events[1].result, AuditResult::Failure);
}

#[test]
fn drop_instance_is_refused_while_live() {
    let mut cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let admin = processor(&cluster);

    let refused = admin.handle_delete(&instance(0));
    assert!(refused.is_error());
    assert!(cluster.accessor.instance_config(&instance(0)).unwrap().is_some());

    cluster.disconnect(&instance(0));
    let dropped = admin.handle_delete(&instance(0));
    assert!(!dropped.is_error());
    assert!(admin.handle_get(&instance(0)).is_error());

    let events = admin.audit().get_by_type(AuditEventType::InstanceDropped, 10);
    assert_eq!(events.len(), 2);
    assert_eq!(admin.audit().stats().failures, 1);
}

#[test]
fn every_command_is_audited() {
    let cluster = TestCluster::connected(&cluster_config(2, 2, 1, MASTER_SLAVE));
    let admin = processor(&cluster);

    admin.handle(&instance(0), r#"{"command":"enableInstance","enabled":"false"}"#);
    admin.handle(&instance(0), r#"{"command":"enableInstance","enabled":"true"}"#);
    admin.handle(
        &instance(1),
        r#"{"command":"enablePartition","enabled":"false","resource":"testResource","partition":"testResource_0"}"#,
    );
    admin.handle(&instance(1), r#"{"command":"enableInstance"}"#);

    let stats = admin.audit().stats();
    assert_eq!(stats.total_events, 4);
    assert_eq!(stats.failures, 1);
    assert_eq!(admin.audit().get_by_instance(&instance(0), 10).len(), 2);
    let partition_events = admin
        .audit()
        .get_by_type(AuditEventType::PartitionEnablement, 10);
    assert_eq!(partition_events.len(), 1);
    assert_eq!(partition_events[0].cluster, common::CLUSTER);
}

#[test]
fn session_tokens_compare_by_value() {
    assert_eq!(SessionId::new("abc"), SessionId::new("abc"));
    assert_ne!(SessionId::generate(), SessionId::generate());
}
