//! Command registry for dispatching requests to handlers.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::error::{CommandErrorKind, DaemonError};
use crate::health::HealthChecker;
use crate::metrics::MetricsCollector;
use crate::services::ServiceRegistry;

use super::service::{
    ApplyServiceCommand, ControlServiceCommand, ListBackupsCommand, PruneBackupsCommand,
    StatusServiceCommand,
};
use super::system::{HealthCommand, HealthLevel, MetricsCommand, MetricsFormat, PingCommand};
use super::traits::Command;
use super::types::{CommandParams, CommandResult, ExecutionContext};

/// Components the commands operate on.
#[derive(Clone)]
pub struct CommandDeps {
    pub services: Arc<ServiceRegistry>,
    pub health: Arc<HealthChecker>,
    pub metrics: Arc<MetricsCollector>,
    pub metrics_prefix: String,
}

/// Registry of all available commands.
#[derive(Clone)]
pub struct CommandRegistry {
    commands: HashMap<&'static str, Arc<dyn Command>>,
}

impl CommandRegistry {
    /// Create a registry with every built-in command.
    pub fn new(deps: CommandDeps) -> Self {
        let mut registry = Self {
            commands: HashMap::new(),
        };
        let services = &deps.services;

        registry.register(Arc::new(PingCommand::new(Arc::clone(services))));

        // Service commands
        registry.register(Arc::new(ApplyServiceCommand::new(Arc::clone(services))));
        registry.register(Arc::new(ControlServiceCommand::start(Arc::clone(services))));
        registry.register(Arc::new(ControlServiceCommand::stop(Arc::clone(services))));
        registry.register(Arc::new(ControlServiceCommand::restart(Arc::clone(services))));
        registry.register(Arc::new(StatusServiceCommand::new(Arc::clone(services))));
        registry.register(Arc::new(ListBackupsCommand::new(Arc::clone(services))));
        registry.register(Arc::new(PruneBackupsCommand::new(Arc::clone(services))));

        // Health commands
        for level in HealthLevel::ALL {
            registry.register(Arc::new(HealthCommand::new(level, Arc::clone(&deps.health))));
        }

        // Metrics commands
        for format in [MetricsFormat::Json, MetricsFormat::Exposition] {
            registry.register(Arc::new(MetricsCommand::new(
                format,
                Arc::clone(&deps.metrics),
                deps.metrics_prefix.clone(),
            )));
        }

        info!(
            count = registry.commands.len(),
            "Command registry initialized"
        );

        registry
    }

    fn register(&mut self, command: Arc<dyn Command>) {
        let name = command.name();
        debug!(command = name, "Registering command");
        self.commands.insert(name, command);
    }

    /// Get a command by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Command>> {
        self.commands.get(name).cloned()
    }

    /// Look up, validate and run a command.
    pub fn dispatch(
        &self,
        ctx: &ExecutionContext,
        command_name: &str,
        params: CommandParams,
    ) -> Result<CommandResult, DaemonError> {
        let command = self
            .commands
            .get(command_name)
            .ok_or_else(|| DaemonError::Command {
                kind: CommandErrorKind::UnknownCommand {
                    name: command_name.to_string(),
                },
            })?;

        command.validate(&params)?;

        command.execute(ctx, params)
    }

    /// All registered command names, sorted.
    pub fn list_commands(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.commands.keys().copied().collect();
        names.sort_unstable();
        names
    }
}
