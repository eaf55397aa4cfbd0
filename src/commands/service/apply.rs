//! `service.apply`: render, write and activate a service config.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::commands::traits::Command;
use crate::commands::types::{CommandParams, CommandResult, ExecutionContext};
use crate::error::DaemonError;
use crate::services::{ServiceDefinition, ServiceRegistry, ShareRecord};

const RESPONSE_MARGIN: Duration = Duration::from_secs(2);

/// Parameters: `definition` (a ServiceDefinition) and `shares` (ShareRecords,
/// optional). A config the service rejected is reported as a failed result
/// that still carries the full apply outcome.
pub struct ApplyServiceCommand {
    services: Arc<ServiceRegistry>,
}

impl ApplyServiceCommand {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

impl Command for ApplyServiceCommand {
    fn name(&self) -> &'static str {
        "service.apply"
    }

    fn validate(&self, params: &CommandParams) -> Result<(), DaemonError> {
        let definition: ServiceDefinition = params.get_typed("definition")?;
        params.get_typed_or_default::<Vec<ShareRecord>>("shares")?;
        self.services.resolve(definition.service_type.as_str())?;
        Ok(())
    }

    fn execute(
        &self,
        ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<CommandResult, DaemonError> {
        let definition: ServiceDefinition = params.get_typed("definition")?;
        let shares: Vec<ShareRecord> = params.get_typed_or_default("shares")?;
        let manager = self.services.resolve(definition.service_type.as_str())?;

        let result = manager.apply(&definition, &shares)?;
        let data = serde_json::to_value(&result)?;

        match &result.failure {
            None => {
                info!(
                    request_id = %ctx.request_id,
                    service = %result.service,
                    action = ?result.action,
                    changed = result.changed,
                    "Apply completed"
                );
                Ok(CommandResult::success(data))
            }
            Some(failure) => {
                warn!(
                    request_id = %ctx.request_id,
                    service = %result.service,
                    code = failure.code,
                    "Apply rolled back"
                );
                Ok(CommandResult::failure(failure.code, failure.message.clone()).with_data(data))
            }
        }
    }

    /// The slowest service's full apply, rollback included, plus time to
    /// build the response.
    fn timeout(&self) -> Duration {
        self.services.apply_budget() + RESPONSE_MARGIN
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context, registry};
    use serde_json::json;

    fn definition() -> serde_json::Value {
        json!({
            "name": "smb",
            "service_type": "smb",
            "auto_start": true,
            "configuration": { "type": "smb", "workgroup": "HOME" }
        })
    }

    #[test]
    fn test_apply_writes_and_starts() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ApplyServiceCommand::new(registry(dir.path()));
        let params = CommandParams::new(json!({
            "definition": definition(),
            "shares": [{ "name": "docs", "path": "/mnt/docs", "protocol": "smb" }]
        }));

        cmd.validate(&params).unwrap();
        let result = cmd.execute(&context("service.apply"), params).unwrap();
        assert!(result.success);

        let data = result.data.unwrap();
        assert_eq!(data["action"], "started");
        assert_eq!(data["state"], "running");
        assert_eq!(data["changed"], true);

        let written = std::fs::read_to_string(dir.path().join("smb.conf")).unwrap();
        assert!(written.contains("[docs]"));
        assert!(written.contains("workgroup = HOME"));
    }

    #[test]
    fn test_validate_requires_definition() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ApplyServiceCommand::new(registry(dir.path()));

        let err = cmd.validate(&CommandParams::new(json!({}))).unwrap_err();
        assert_eq!(err.code(), "VALIDATION_ERROR");

        let mismatched = CommandParams::new(json!({
            "definition": definition(),
            "shares": [{ "name": "docs", "path": "/mnt/docs" }]
        }));
        assert!(cmd.validate(&mismatched).is_err());
    }

    #[test]
    fn test_timeout_covers_slowest_apply() {
        let dir = tempfile::tempdir().unwrap();
        let services = registry(dir.path());
        let cmd = ApplyServiceCommand::new(Arc::clone(&services));

        for manager in services.managers() {
            assert!(cmd.timeout() > manager.apply_budget());
        }
    }

    #[test]
    fn test_line_break_is_render_error() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = ApplyServiceCommand::new(registry(dir.path()));
        let params = CommandParams::new(json!({
            "definition": definition(),
            "shares": [{ "name": "docs", "path": "/mnt/docs\n[evil]", "protocol": "smb" }]
        }));

        let err = cmd.execute(&context("service.apply"), params).unwrap_err();
        assert_eq!(err.code(), "RENDER_ERROR");
        assert!(!dir.path().join("smb.conf").exists());
    }
}
