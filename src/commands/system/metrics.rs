//! Metrics commands: nested JSON snapshot and text exposition.

use std::sync::Arc;
use std::time::Duration;

use crate::error::DaemonError;
use crate::metrics::{render_exposition, MetricsCollector};

use super::super::traits::Command;
use super::super::types::{CommandParams, CommandResult, ExecutionContext};

const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricsFormat {
    Json,
    Exposition,
}

/// Collects a fresh snapshot on every call. Read-only.
pub struct MetricsCommand {
    format: MetricsFormat,
    collector: Arc<MetricsCollector>,
    prefix: String,
}

impl MetricsCommand {
    pub fn new(format: MetricsFormat, collector: Arc<MetricsCollector>, prefix: impl Into<String>) -> Self {
        Self {
            format,
            collector,
            prefix: prefix.into(),
        }
    }
}

impl Command for MetricsCommand {
    fn name(&self) -> &'static str {
        match self.format {
            MetricsFormat::Json => "metrics.json",
            MetricsFormat::Exposition => "metrics.exposition",
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
        let snapshot = self.collector.collect();

        let data = match self.format {
            MetricsFormat::Json => serde_json::to_value(&snapshot)?,
            MetricsFormat::Exposition => serde_json::json!({
                "content_type": EXPOSITION_CONTENT_TYPE,
                "body": render_exposition(&snapshot, &self.prefix),
            }),
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
