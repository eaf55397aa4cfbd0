//! Config backup commands.

use std::sync::Arc;

use tracing::info;

use crate::commands::traits::Command;
use crate::commands::types::{CommandParams, CommandResult, ExecutionContext};
use crate::error::DaemonError;
use crate::services::ServiceRegistry;

/// List the backups of a service's config file, oldest first.
pub struct ListBackupsCommand {
    services: Arc<ServiceRegistry>,
}

impl ListBackupsCommand {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

impl Command for ListBackupsCommand {
    fn name(&self) -> &'static str {
        "service.backups"
    }

    fn validate(&self, params: &CommandParams) -> Result<(), DaemonError> {
        params.get_service()?;
        Ok(())
    }

    fn execute(
        &self,
        _ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<CommandResult, DaemonError> {
        let manager = self.services.resolve(&params.get_string("service")?)?;
        let backups = manager.backups()?;

        Ok(CommandResult::success(serde_json::json!({
            "service": manager.name(),
            "config_path": manager.config_path(),
            "backups": backups,
        })))
    }
}

/// Delete all but the newest `keep` backups of a service's config file.
pub struct PruneBackupsCommand {
    services: Arc<ServiceRegistry>,
}

impl PruneBackupsCommand {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

impl Command for PruneBackupsCommand {
    fn name(&self) -> &'static str {
        "service.prune_backups"
    }

    fn validate(&self, params: &CommandParams) -> Result<(), DaemonError> {
        params.get_service()?;
        params.get_u64("keep")?;
        Ok(())
    }

    fn execute(
        &self,
        ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<CommandResult, DaemonError> {
        let manager = self.services.resolve(&params.get_string("service")?)?;
        let keep = usize::try_from(params.get_u64("keep")?)
            .map_err(|_| DaemonError::invalid("keep", "out of range"))?;

        let removed = manager.prune_backups(keep)?;

        info!(
            request_id = %ctx.request_id,
            service = %manager.name(),
            keep = keep,
            removed = removed.len(),
            "Pruned config backups"
        );

        Ok(CommandResult::success(serde_json::json!({
            "service": manager.name(),
            "removed": removed,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::test_support::{context, registry};
    use crate::services::{NfsConfig, ServiceConfig, ServiceDefinition, ShareRecord, ServiceType};
    use serde_json::json;

    fn apply_twice(services: &ServiceRegistry) {
        let manager = services.get(ServiceType::Nfs).unwrap();
        let mut nfs = NfsConfig {
            default_options: vec!["sync".to_string()],
            root_squash: true,
            default_clients: vec!["10.0.0.0/24".to_string()],
        };
        let share = ShareRecord::new("media", "/mnt/media", ServiceType::Nfs);

        let definition = ServiceDefinition::new(ServiceConfig::Nfs(nfs.clone()));
        manager.apply(&definition, &[share.clone()]).unwrap();

        nfs.root_squash = false;
        let definition = ServiceDefinition::new(ServiceConfig::Nfs(nfs));
        manager.apply(&definition, &[share]).unwrap();
    }

    #[test]
    fn test_list_and_prune() {
        let dir = tempfile::tempdir().unwrap();
        let services = registry(dir.path());
        apply_twice(&services);

        let listed = ListBackupsCommand::new(Arc::clone(&services))
            .execute(&context("service.backups"), CommandParams::new(json!({ "service": "nfs" })))
            .unwrap();
        assert_eq!(listed.data.unwrap()["backups"].as_array().unwrap().len(), 1);

        let pruned = PruneBackupsCommand::new(Arc::clone(&services))
            .execute(
                &context("service.prune_backups"),
                CommandParams::new(json!({ "service": "nfs", "keep": 0 })),
            )
            .unwrap();
        assert_eq!(pruned.data.unwrap()["removed"].as_array().unwrap().len(), 1);
        assert!(services.get(ServiceType::Nfs).unwrap().backups().unwrap().is_empty());
    }

    #[test]
    fn test_prune_requires_keep() {
        let dir = tempfile::tempdir().unwrap();
        let cmd = PruneBackupsCommand::new(registry(dir.path()));
        assert!(cmd.validate(&CommandParams::new(json!({ "service": "nfs" }))).is_err());
        assert!(cmd
            .validate(&CommandParams::new(json!({ "service": "nfs", "keep": 5 })))
            .is_ok());
    }
}
