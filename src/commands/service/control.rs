//! Service lifecycle commands: start, stop and restart.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::commands::traits::Command;
use crate::commands::types::{CommandParams, CommandResult, ExecutionContext};
use crate::error::DaemonError;
use crate::services::{ServiceManager, ServiceRegistry, ServiceStatus};

const RESPONSE_MARGIN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Start,
    Stop,
    Restart,
}

impl Transition {
    fn as_str(self) -> &'static str {
        match self {
            Transition::Start => "start",
            Transition::Stop => "stop",
            Transition::Restart => "restart",
        }
    }

    fn run(self, manager: &ServiceManager) -> Result<ServiceStatus, DaemonError> {
        match self {
            Transition::Start => manager.start(),
            Transition::Stop => manager.stop(),
            Transition::Restart => manager.restart(),
        }
    }
}

/// `service.start`, `service.stop` or `service.restart` on the `service` parameter.
pub struct ControlServiceCommand {
    transition: Transition,
    services: Arc<ServiceRegistry>,
}

impl ControlServiceCommand {
    fn new(transition: Transition, services: Arc<ServiceRegistry>) -> Self {
        Self {
            transition,
            services,
        }
    }

    pub fn start(services: Arc<ServiceRegistry>) -> Self {
        Self::new(Transition::Start, services)
    }

    pub fn stop(services: Arc<ServiceRegistry>) -> Self {
        Self::new(Transition::Stop, services)
    }

    pub fn restart(services: Arc<ServiceRegistry>) -> Self {
        Self::new(Transition::Restart, services)
    }
}

impl Command for ControlServiceCommand {
    fn name(&self) -> &'static str {
        match self.transition {
            Transition::Start => "service.start",
            Transition::Stop => "service.stop",
            Transition::Restart => "service.restart",
        }
    }

    fn validate(&self, params: &CommandParams) -> Result<(), DaemonError> {
        params.get_service()?;
        Ok(())
    }

    fn execute(
        &self,
        ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<CommandResult, DaemonError> {
        let manager = self.services.resolve(&params.get_string("service")?)?;

        debug!(
            request_id = %ctx.request_id,
            service = %manager.name(),
            action = self.transition.as_str(),
            "Running service transition"
        );

        let status = self.transition.run(&manager)?;

        info!(
            request_id = %ctx.request_id,
            service = %manager.name(),
            action = self.transition.as_str(),
            state = %status.state,
            "Service transition completed"
        );

        Ok(CommandResult::success(serde_json::json!({
            "service": manager.name(),
            "action": self.transition.as_str(),
            "status": status,
        })))
    }

    /// The slowest service's transition, settle wait included.
    fn timeout(&self) -> Duration {
        self.services.control_budget() + RESPONSE_MARGIN
    }
}
