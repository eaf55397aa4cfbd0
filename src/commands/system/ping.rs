//! Liveness round trip over the control socket.

use std::sync::Arc;

use chrono::Utc;

use crate::error::DaemonError;
use crate::services::ServiceRegistry;

use super::super::traits::Command;
use super::super::types::{CommandParams, CommandResult, ExecutionContext};

/// Answers with the daemon version, the caller's identity and the managed
/// services. Never probes a unit.
pub struct PingCommand {
    services: Arc<ServiceRegistry>,
}

impl PingCommand {
    pub fn new(services: Arc<ServiceRegistry>) -> Self {
        Self { services }
    }
}

impl Command for PingCommand {
    fn name(&self) -> &'static str {
        "system.ping"
    }

    fn validate(&self, _params: &CommandParams) -> Result<(), DaemonError> {
        Ok(())
    }

    fn execute(
        &self,
        ctx: &ExecutionContext,
        _params: CommandParams,
    ) -> Result<CommandResult, DaemonError> {
        Ok(CommandResult::success(serde_json::json!({
            "pong": true,
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": Utc::now().to_rfc3339(),
            "request_id": ctx.request_id,
            "peer_uid": ctx.peer.uid,
            "services": self.services.list(),
        })))
    }

    fn quiet(&self) -> bool {
        true
    }
}
