//! Service status command.

use std::sync::Arc;

use crate::commands::traits::Command;
use crate::commands::types::{CommandParams, CommandResult, ExecutionContext};
use crate::error::DaemonError;
use crate::services::ServiceRegistry;

/// Observe one service, or every registered service when `service` is omitted.
pub struct StatusServiceCommand {
    services: Arc<ServiceRegistry>,
}

impl StatusServiceCommand {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

impl Command for StatusServiceCommand {
    fn name(&self) -> &'static str {
        "service.status"
    }

    fn validate(&self, params: &CommandParams) -> Result<(), DaemonError> {
        if params.has("service") {
            params.get_service()?;
        }
        Ok(())
    }

    fn execute(
        &self,
        _ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<CommandResult, DaemonError> {
        match params.get_optional_string("service") {
            Some(name) => {
                let manager = self.services.resolve(&name)?;
                Ok(CommandResult::success(serde_json::to_value(manager.status())?))
            }
            None => Ok(CommandResult::success(serde_json::json!({
                "services": self.services.statuses(),
            }))),
        }
    }

    fn quiet(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context, registry};
    use serde_json::json;

    #[test]
    fn test_single_status() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StatusServiceCommand::new(registry(dir.path()));

        let result = cmd
            .execute(&context("service.status"), CommandParams::new(json!({ "service": "ftp" })))
            .unwrap();
        let data = result.data.unwrap();
        assert_eq!(data["service"], "ftp");
        assert_eq!(data["state"], "stopped");
    }

    #[test]
    fn test_all_statuses() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = StatusServiceCommand::new(registry(dir.path()));

        let result = cmd
            .execute(&context("service.status"), CommandParams::new(json!({})))
            .unwrap();
        assert_eq!(result.data.unwrap()["services"].as_array().unwrap().len(), 3);
        assert!(cmd.quiet());
    }
}
