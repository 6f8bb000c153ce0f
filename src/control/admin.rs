//! Administrative commands.
//!
//! Operator commands are plain metadata mutations. They never plan or write
//! instructions themselves; the runs they trigger do. The JSON surface
//! mirrors the instance resource of the admin service: every response carries
//! status 200, with either the instance's config or an `{"ERROR": ...}` body.

use crate::control::accessor::MetadataAccessor;
use crate::control::api::{ErrorMarkers, InstanceConfig};
use crate::control::state_model::{StateModelDefinition, ERROR_STATE};
use crate::core::error::{StewardError, StewardResult};
use crate::ops::audit::{AuditEvent, AuditEventType, AuditLog, AuditResult};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Command names, as operators spell them.
pub const ENABLE_INSTANCE: &str = "enableInstance";
pub const ENABLE_PARTITION: &str = "enablePartition";
pub const RESET_PARTITION: &str = "resetPartition";
pub const RESET_INSTANCE: &str = "resetInstance";

/// Every recognized command name.
pub const VALID_COMMANDS: [&str; 4] = [ENABLE_INSTANCE, ENABLE_PARTITION, RESET_PARTITION, RESET_INSTANCE];

/// A parsed operator command against one instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdminCommand {
    EnableInstance {
        enabled: bool,
    },
    EnablePartition {
        enabled: bool,
        resource: String,
        partitions: Vec<String>,
    },
    ResetPartition {
        resource: String,
        partitions: Vec<String>,
    },
    ResetInstance,
}

impl AdminCommand {
    /// Parse a JSON command body.
    ///
    /// Command names match case-insensitively. `enablePartition` takes a
    /// `;`-separated partition list, `resetPartition` a whitespace-separated one.
    pub fn from_json(body: &str) -> StewardResult<Self> {
        let value: Value = serde_json::from_str(body)
            .map_err(|e| StewardError::invalid_request(format!("malformed command body: {}", e)))?;
        let params = value
            .as_object()
            .ok_or_else(|| StewardError::invalid_request("command body must be a JSON object"))?;
        let command = string_param(params, "command")?;

        if command.eq_ignore_ascii_case(ENABLE_INSTANCE) {
            Ok(Self::EnableInstance {
                enabled: bool_param(params, "enabled")?,
            })
        } else if command.eq_ignore_ascii_case(ENABLE_PARTITION) {
            Ok(Self::EnablePartition {
                enabled: bool_param(params, "enabled")?,
                resource: string_param(params, "resource")?,
                partitions: split_list(&string_param(params, "partition")?, |c| c == ';'),
            })
        } else if command.eq_ignore_ascii_case(RESET_PARTITION) {
            Ok(Self::ResetPartition {
                resource: string_param(params, "resource")?,
                partitions: split_list(&string_param(params, "partition")?, char::is_whitespace),
            })
        } else if command.eq_ignore_ascii_case(RESET_INSTANCE) {
            Ok(Self::ResetInstance)
        } else {
            Err(StewardError::UnsupportedCommand {
                command,
                valid: VALID_COMMANDS.to_vec(),
            })
        }
    }

    /// Canonical command name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::EnableInstance { .. } => ENABLE_INSTANCE,
            Self::EnablePartition { .. } => ENABLE_PARTITION,
            Self::ResetPartition { .. } => RESET_PARTITION,
            Self::ResetInstance => RESET_INSTANCE,
        }
    }
}

fn string_param(params: &Map<String, Value>, name: &str) -> StewardResult<String> {
    match params.get(name) {
        Some(Value::String(s)) => Ok(s.clone()),
        Some(Value::Bool(b)) => Ok(b.to_string()),
        Some(Value::Number(n)) => Ok(n.to_string()),
        Some(_) => Err(StewardError::invalid_request(format!(
            "parameter '{}' must be a string",
            name
        ))),
        None => Err(StewardError::invalid_request(format!(
            "missing parameter '{}'",
            name
        ))),
    }
}

/// Parses a `"true"`/`"false"` flag, ignoring case. Other values are
/// rejected rather than read as false.
fn bool_param(params: &Map<String, Value>, name: &str) -> StewardResult<bool> {
    let raw = string_param(params, name)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(StewardError::invalid_request(format!(
            "parameter '{}' must be \"true\" or \"false\", got '{}'",
            name, raw
        ))),
    }
}

fn split_list(raw: &str, separator: impl Fn(char) -> bool) -> Vec<String> {
    raw.split(separator)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// Response of the admin surface. `status` is always 200.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminResponse {
    pub status: u16,
    pub body: Value,
}

impl AdminResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(error: &StewardError) -> Self {
        let mut body = Map::new();
        body.insert("ERROR".to_string(), Value::String(error.to_string()));
        Self {
            status: 200,
            body: Value::Object(body),
        }
    }

    /// Check if the body is an error object.
    pub fn is_error(&self) -> bool {
        self.body.get("ERROR").is_some()
    }
}

/// Applies operator commands to one cluster's metadata.
#[derive(Clone)]
pub struct AdminCommandProcessor {
    accessor: MetadataAccessor,
    audit: Arc<AuditLog>,
}

impl AdminCommandProcessor {
    pub fn new(accessor: MetadataAccessor, audit: Arc<AuditLog>) -> Self {
        Self { accessor, audit }
    }

    pub fn cluster(&self) -> &str {
        self.accessor.cluster()
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    /// Toggle an instance's enabled flag.
    pub fn enable_instance(&self, instance: &str, enabled: bool) -> StewardResult<InstanceConfig> {
        let result = self
            .accessor
            .update_instance_config(instance, |config| config.enabled = enabled);
        self.record(
            AuditEventType::InstanceEnablement,
            instance,
            format!("enabled={}", enabled),
            &result,
        );
        result
    }

    /// Toggle the per-partition disabled marker on one instance.
    pub fn enable_partition(
        &self,
        enabled: bool,
        instance: &str,
        resource: &str,
        partitions: &[String],
    ) -> StewardResult<InstanceConfig> {
        let result = self.require_resource(resource).and_then(|_| {
            self.accessor.update_instance_config(instance, |config| {
                config.set_partitions_enabled(resource, partitions.iter().map(String::as_str), enabled)
            })
        });
        self.record(
            AuditEventType::PartitionEnablement,
            instance,
            format!("enabled={} resource={} partitions={}", enabled, resource, partitions.join(";")),
            &result,
        );
        result
    }

    /// Clear error markers for the named partitions on one instance.
    ///
    /// Every named partition must either carry a marker or be observed in
    /// `ERROR`; otherwise nothing changes. An observed `ERROR` label is
    /// rewritten to the state model's initial label so the next run plans
    /// from there.
    pub fn reset_partition(&self, instance: &str, resource: &str, partitions: &[String]) -> StewardResult<()> {
        let result = self.try_reset_partition(instance, resource, partitions);
        self.record(
            AuditEventType::PartitionReset,
            instance,
            format!("resource={} partitions={}", resource, partitions.join(" ")),
            &result,
        );
        result
    }

    fn try_reset_partition(&self, instance: &str, resource: &str, partitions: &[String]) -> StewardResult<()> {
        self.require_instance(instance)?;
        if partitions.is_empty() {
            return Err(StewardError::invalid_request("no partitions named"));
        }
        let initial = self.initial_label(resource)?;
        let mut markers = self
            .accessor
            .error_marker(instance, resource)?
            .unwrap_or_else(|| ErrorMarkers::new(resource));
        let observed = self.accessor.observed_state(instance, resource)?;

        let not_in_error: Vec<&str> = partitions
            .iter()
            .filter(|p| {
                let marked = markers.partitions.contains(p.as_str());
                let errored = observed
                    .as_ref()
                    .and_then(|o| o.get(p.as_str()))
                    .is_some_and(|e| e.state == ERROR_STATE);
                !marked && !errored
            })
            .map(String::as_str)
            .collect();
        if !not_in_error.is_empty() {
            return Err(StewardError::invalid_request(format!(
                "can't reset state for {}/[{}] on {}: not in {} state",
                resource,
                not_in_error.join(", "),
                instance,
                ERROR_STATE
            )));
        }

        for partition in partitions {
            markers.partitions.remove(partition);
        }
        self.accessor.put_error_markers(instance, &markers)?;

        if let Some(mut observed) = observed {
            let mut rewritten = false;
            for partition in partitions {
                if let Some(entry) = observed.partitions.get_mut(partition) {
                    if entry.state == ERROR_STATE {
                        entry.state = initial.clone();
                        rewritten = true;
                    }
                }
            }
            if rewritten {
                self.accessor.put_observed_state(&observed)?;
            }
        }

        tracing::info!(
            cluster = %self.cluster(),
            instance = %instance,
            resource = %resource,
            partitions = ?partitions,
            "partitions reset"
        );
        Ok(())
    }

    /// Clear every error marker on the named instances.
    ///
    /// Observed `ERROR` labels are rewritten to their resource's initial
    /// label. Resources without a desired state keep their labels.
    pub fn reset_instance(&self, instances: &[String]) -> StewardResult<()> {
        let result = instances
            .iter()
            .try_for_each(|i| self.require_instance(i).map(|_| ()))
            .and_then(|_| instances.iter().try_for_each(|i| self.try_reset_instance(i)));
        self.record(
            AuditEventType::InstanceReset,
            &instances.join(","),
            String::new(),
            &result,
        );
        result
    }

    fn try_reset_instance(&self, instance: &str) -> StewardResult<()> {
        self.accessor.clear_error_markers(instance)?;
        for mut observed in self.accessor.observed_states(instance)? {
            if !observed.partitions.values().any(|e| e.state == ERROR_STATE) {
                continue;
            }
            let initial = match self.initial_label(&observed.resource) {
                Ok(initial) => initial,
                Err(e) => {
                    tracing::warn!(
                        cluster = %self.cluster(),
                        instance = %instance,
                        resource = %observed.resource,
                        error = %e,
                        "error labels left in place"
                    );
                    continue;
                }
            };
            for entry in observed.partitions.values_mut() {
                if entry.state == ERROR_STATE {
                    entry.state = initial.clone();
                }
            }
            self.accessor.put_observed_state(&observed)?;
        }
        tracing::info!(cluster = %self.cluster(), instance = %instance, "instance reset");
        Ok(())
    }

    /// Remove an instance from cluster membership.
    ///
    /// Refused while the instance is live. Its config, observed state,
    /// instruction queue, and error markers all go.
    pub fn drop_instance(&self, instance: &str) -> StewardResult<()> {
        let result = self.try_drop_instance(instance);
        self.record(AuditEventType::InstanceDropped, instance, String::new(), &result);
        result
    }

    fn try_drop_instance(&self, instance: &str) -> StewardResult<()> {
        self.require_instance(instance)?;
        if self.accessor.live_instance(instance)?.is_some() {
            return Err(StewardError::invalid_request(format!(
                "instance {} is still live",
                instance
            )));
        }
        self.accessor.remove_instance(instance)?;
        tracing::info!(cluster = %self.cluster(), instance = %instance, "instance dropped");
        Ok(())
    }

    /// An instance's config as JSON.
    pub fn instance_representation(&self, instance: &str) -> StewardResult<Value> {
        let config = self.require_instance(instance)?;
        serde_json::to_value(&config).map_err(|e| StewardError::Serialization {
            path: self.accessor.keys().instance_config(instance),
            message: e.to_string(),
        })
    }

    /// Apply a parsed command to `instance`.
    pub fn execute(&self, instance: &str, command: &AdminCommand) -> StewardResult<()> {
        match command {
            AdminCommand::EnableInstance { enabled } => self.enable_instance(instance, *enabled).map(|_| ()),
            AdminCommand::EnablePartition {
                enabled,
                resource,
                partitions,
            } => self
                .enable_partition(*enabled, instance, resource, partitions)
                .map(|_| ()),
            AdminCommand::ResetPartition { resource, partitions } => {
                self.reset_partition(instance, resource, partitions)
            }
            AdminCommand::ResetInstance => self.reset_instance(&[instance.to_string()]),
        }
    }

    /// POST: parse and apply a JSON command body.
    pub fn handle(&self, instance: &str, body: &str) -> AdminResponse {
        let command = match AdminCommand::from_json(body) {
            Ok(command) => command,
            Err(e) => {
                self.record(AuditEventType::CommandRejected, instance, body.to_string(), &Err::<(), _>(&e));
                tracing::warn!(cluster = %self.cluster(), instance = %instance, error = %e, "command rejected");
                return AdminResponse::error(&e);
            }
        };
        match self
            .execute(instance, &command)
            .and_then(|_| self.instance_representation(instance))
        {
            Ok(body) => AdminResponse::ok(body),
            Err(e) => {
                tracing::warn!(
                    cluster = %self.cluster(),
                    instance = %instance,
                    command = command.name(),
                    error = %e,
                    "command failed"
                );
                AdminResponse::error(&e)
            }
        }
    }

    /// GET: the instance's config.
    pub fn handle_get(&self, instance: &str) -> AdminResponse {
        match self.instance_representation(instance) {
            Ok(body) => AdminResponse::ok(body),
            Err(e) => AdminResponse::error(&e),
        }
    }

    /// DELETE: drop the instance.
    pub fn handle_delete(&self, instance: &str) -> AdminResponse {
        match self.drop_instance(instance) {
            Ok(()) => AdminResponse::ok(Value::Object(Map::new())),
            Err(e) => AdminResponse::error(&e),
        }
    }

    fn require_instance(&self, instance: &str) -> StewardResult<InstanceConfig> {
        self.accessor
            .instance_config(instance)?
            .ok_or_else(|| StewardError::InstanceNotFound {
                cluster: self.cluster().to_string(),
                instance: instance.to_string(),
            })
    }

    fn require_resource(&self, resource: &str) -> StewardResult<()> {
        match self.accessor.desired_state(resource)? {
            Some(_) => Ok(()),
            None => Err(StewardError::ResourceNotFound {
                cluster: self.cluster().to_string(),
                resource: resource.to_string(),
            }),
        }
    }

    /// Initial label of the state model governing `resource`.
    fn initial_label(&self, resource: &str) -> StewardResult<String> {
        let desired = self
            .accessor
            .desired_state(resource)?
            .ok_or_else(|| StewardError::ResourceNotFound {
                cluster: self.cluster().to_string(),
                resource: resource.to_string(),
            })?;
        let stored = self
            .accessor
            .state_models()?
            .into_iter()
            .find(|m| m.name == desired.state_model && m.validate().is_ok());
        stored
            .or_else(|| StateModelDefinition::builtin(&desired.state_model))
            .map(|m| m.initial_state)
            .ok_or_else(|| {
                StewardError::invalid_request(format!(
                    "resource {} uses unknown state model {}",
                    resource, desired.state_model
                ))
            })
    }

    fn record<T, E: std::fmt::Display>(
        &self,
        event_type: AuditEventType,
        instance: &str,
        details: String,
        result: &Result<T, E>,
    ) {
        let mut event = AuditEvent::new(event_type, self.cluster()).with_instance(instance);
        event = match result {
            Ok(_) => event.with_result(AuditResult::Success).with_details(details),
            Err(e) => event
                .with_result(AuditResult::Failure)
                .with_details(format!("{} error={}", details, e).trim().to_string()),
        };
        self.audit.log(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_names_match_case_insensitively() {
        let command = AdminCommand::from_json(r#"{"command":"ENABLEINSTANCE","enabled":"false"}"#).unwrap();
        assert_eq!(command, AdminCommand::EnableInstance { enabled: false });
    }

    #[test]
    fn enable_partition_splits_on_semicolons() {
        let command = AdminCommand::from_json(
            r#"{"command":"enablePartition","enabled":"true","resource":"db","partition":"db_0;db_1;"}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            AdminCommand::EnablePartition {
                enabled: true,
                resource: "db".into(),
                partitions: vec!["db_0".into(), "db_1".into()],
            }
        );
    }

    #[test]
    fn reset_partition_splits_on_whitespace() {
        let command = AdminCommand::from_json(
            r#"{"command":"resetPartition","resource":"db","partition":"db_0  db_3\tdb_4"}"#,
        )
        .unwrap();
        assert_eq!(
            command,
            AdminCommand::ResetPartition {
                resource: "db".into(),
                partitions: vec!["db_0".into(), "db_3".into(), "db_4".into()],
            }
        );
    }

    #[test]
    fn missing_parameter_is_named() {
        let err = AdminCommand::from_json(r#"{"command":"enablePartition","enabled":"true"}"#).unwrap_err();
        assert!(matches!(err, StewardError::InvalidRequest { .. }));
        assert!(err.to_string().contains("'resource'"));
    }

    #[test]
    fn unknown_command_lists_valid_set() {
        let err = AdminCommand::from_json(r#"{"command":"rebootEverything"}"#).unwrap_err();
        match err {
            StewardError::UnsupportedCommand { command, valid } => {
                assert_eq!(command, "rebootEverything");
                assert_eq!(valid, VALID_COMMANDS.to_vec());
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn enabled_must_be_boolean_text() {
        let err = AdminCommand::from_json(r#"{"command":"enableInstance","enabled":"maybe"}"#).unwrap_err();
        assert!(matches!(err, StewardError::InvalidRequest { .. }));
    }
}
