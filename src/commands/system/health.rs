//! Health commands, one per check level.

use std::sync::Arc;
use std::time::Duration;

use crate::error::DaemonError;
use crate::health::HealthChecker;

use super::super::traits::Command;
use super::super::types::{CommandParams, CommandResult, ExecutionContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthLevel {
    Liveness,
    Readiness,
    Basic,
    Detailed,
}

impl HealthLevel {
    pub const ALL: [HealthLevel; 4] = [
        HealthLevel::Liveness,
        HealthLevel::Readiness,
        HealthLevel::Basic,
        HealthLevel::Detailed,
    ];
}

/// Runs one health level. An unhealthy report is still a successful command;
/// the status lives in the data.
pub struct HealthCommand {
    level: HealthLevel,
    checker: Arc<HealthChecker>,
}

impl HealthCommand {
    pub fn new(level: HealthLevel, checker: Arc<HealthChecker>) -> Self {
        Self { level, checker }
    }
}

impl Command for HealthCommand {
    fn name(&self) -> &'static str {
        match self.level {
            HealthLevel::Liveness => "health.liveness",
            HealthLevel::Readiness => "health.readiness",
            HealthLevel::Basic => "health.basic",
            HealthLevel::Detailed => "health.detailed",
        }
    }

    fn validate(&self, _params: &CommandParams) -> Result<(), DaemonError> {
        Ok(())
    }

    fn execute(
        &self,
        _ctx: &ExecutionContext,
        _params: CommandParams,
    ) -> Result<CommandResult, DaemonError> {
        let data = match self.level {
            HealthLevel::Liveness => serde_json::to_value(self.checker.liveness())?,
            HealthLevel::Readiness => serde_json::to_value(self.checker.readiness())?,
            HealthLevel::Basic => serde_json::to_value(self.checker.basic())?,
            HealthLevel::Detailed => serde_json::to_value(self.checker.detailed())?,
        };
        Ok(CommandResult::success(data))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(15)
    }

    fn quiet(&self) -> bool {
        true
    }
}
