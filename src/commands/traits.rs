//! The command seam.

use std::time::Duration;

use crate::error::DaemonError;

use super::types::{CommandParams, CommandResult, ExecutionContext};

/// Something the control socket can execute, looked up by `name()`.
///
/// Both methods run on the blocking pool, `validate` first. `execute` may
/// drive subprocesses or disk I/O.
pub trait Command: Send + Sync {
    /// Dotted name such as "service.apply".
    fn name(&self) -> &'static str;

    fn validate(&self, params: &CommandParams) -> Result<(), DaemonError>;

    fn execute(
        &self,
        ctx: &ExecutionContext,
        params: CommandParams,
    ) -> Result<CommandResult, DaemonError>;

    /// Upper bound on how long the caller waits for `execute()`.
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// High-frequency read-only commands log at debug instead of info.
    fn quiet(&self) -> bool {
        false
    }
}
