//! Process control seam.
//!
//! Service managers never spawn processes themselves. They go through a
//! [`ProcessController`], which the daemon backs with systemd and tests
//! replace with a fake.

use std::collections::HashMap;
use std::time::Duration;

use tracing::debug;

use crate::error::{ControlErrorKind, DaemonError};
use crate::executor::SubprocessBuilder;
use crate::metrics::system::read_uptime;

use super::model::{ControlAction, ServiceState};

/// What the init system reports about a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitStatus {
    pub state: ServiceState,
    pub pid: Option<u32>,
    pub uptime: Option<Duration>,
    pub memory_bytes: Option<u64>,
    pub cpu_usage: Option<Duration>,
    pub tasks: Option<u64>,
}

impl UnitStatus {
    /// A status with only the state known.
    pub fn with_state(state: ServiceState) -> Self {
        Self {
            state,
            pid: None,
            uptime: None,
            memory_bytes: None,
            cpu_usage: None,
            tasks: None,
        }
    }
}

/// Starts, stops and inspects service units.
pub trait ProcessController: Send + Sync {
    /// Run `action` against `unit`, returning once the init system reports
    /// the job done.
    fn control(&self, unit: &str, action: ControlAction) -> Result<(), DaemonError>;

    /// Current state and resource usage of `unit`.
    fn status(&self, unit: &str) -> Result<UnitStatus, DaemonError>;

    /// Run a config syntax check. `command` is argv with the program first.
    fn check(&self, command: &[String]) -> Result<(), DaemonError>;

    fn start(&self, unit: &str) -> Result<(), DaemonError> {
        self.control(unit, ControlAction::Start)
    }

    fn stop(&self, unit: &str) -> Result<(), DaemonError> {
        self.control(unit, ControlAction::Stop)
    }

    fn restart(&self, unit: &str) -> Result<(), DaemonError> {
        self.control(unit, ControlAction::Restart)
    }

    fn reload(&self, unit: &str) -> Result<(), DaemonError> {
        self.control(unit, ControlAction::Reload)
    }
}

/// Controller backed by `systemctl`.
pub struct SystemdController {
    timeout: Duration,
}

impl SystemdController {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl ProcessController for SystemdController {
    fn control(&self, unit: &str, action: ControlAction) -> Result<(), DaemonError> {
        debug!(unit = %unit, action = %action, "systemctl");

        SubprocessBuilder::new("systemctl")
            .args([action.as_str(), unit])
            .timeout(self.timeout)
            .run()
            .map_err(|e| with_unit(e, unit, action.as_str()))?
            .ensure_success(unit, action.as_str())?;

        Ok(())
    }

    fn status(&self, unit: &str) -> Result<UnitStatus, DaemonError> {
        let result = SubprocessBuilder::new("systemctl")
            .args([
                "show",
                unit,
                "--property=ActiveState,MainPID,ActiveEnterTimestampMonotonic,MemoryCurrent,CPUUsageNSec,TasksCurrent",
            ])
            .timeout(self.timeout)
            .run()
            .map_err(|e| with_unit(e, unit, "show"))?
            .ensure_success(unit, "show")?;

        Ok(parse_show_output(&result.stdout, read_uptime()))
    }

    fn check(&self, command: &[String]) -> Result<(), DaemonError> {
        let Some((program, args)) = command.split_first() else {
            return Ok(());
        };

        SubprocessBuilder::new(program)
            .args(args)
            .timeout(self.timeout)
            .run()?
            .ensure_success(program, "check")?;

        Ok(())
    }
}

/// Report subprocess timeouts against the unit rather than `systemctl`.
fn with_unit(error: DaemonError, unit: &str, action: &str) -> DaemonError {
    match error {
        DaemonError::Control {
            kind: ControlErrorKind::Timeout { timeout_secs, .. },
        } => DaemonError::Control {
            kind: ControlErrorKind::Timeout {
                unit: unit.to_string(),
                action: action.to_string(),
                timeout_secs,
            },
        },
        other => other,
    }
}

/// Map a systemd `ActiveState` to a lifecycle state.
pub fn map_active_state(active_state: &str) -> ServiceState {
    match active_state {
        "active" | "reloading" => ServiceState::Running,
        "activating" => ServiceState::Starting,
        "deactivating" => ServiceState::Stopping,
        "inactive" => ServiceState::Stopped,
        "failed" => ServiceState::Failed,
        _ => ServiceState::Unknown,
    }
}

/// Parse `systemctl show` output.
///
/// `system_uptime_secs` converts the monotonic activation timestamp into
/// a unit uptime.
pub fn parse_show_output(output: &str, system_uptime_secs: Option<f64>) -> UnitStatus {
    let props: HashMap<&str, &str> = output
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim(), v.trim()))
        .collect();

    // systemd reports unavailable counters as u64::MAX or "[not set]".
    let counter = |key: &str| {
        props
            .get(key)
            .and_then(|v| v.parse::<u64>().ok())
            .filter(|v| *v != u64::MAX)
    };

    let state = props
        .get("ActiveState")
        .map(|s| map_active_state(s))
        .unwrap_or(ServiceState::Unknown);

    let pid = props
        .get("MainPID")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|pid| *pid != 0);

    let uptime = match (counter("ActiveEnterTimestampMonotonic"), system_uptime_secs) {
        (Some(entered_us), Some(now)) if entered_us > 0 && state == ServiceState::Running => {
            let now_us = (now * 1_000_000.0) as u64;
            Some(Duration::from_micros(now_us.saturating_sub(entered_us)))
        }
        _ => None,
    };

    UnitStatus {
        state,
        pid,
        uptime,
        memory_bytes: counter("MemoryCurrent"),
        cpu_usage: counter("CPUUsageNSec").map(Duration::from_nanos),
        tasks: counter("TasksCurrent"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_running_unit() {
        let output = "ActiveState=active\nMainPID=812\nActiveEnterTimestampMonotonic=5000000\n\
                      MemoryCurrent=41943040\nCPUUsageNSec=1500000000\nTasksCurrent=4\n";
        let status = parse_show_output(output, Some(65.0));

        assert_eq!(status.state, ServiceState::Running);
        assert_eq!(status.pid, Some(812));
        assert_eq!(status.uptime, Some(Duration::from_secs(60)));
        assert_eq!(status.memory_bytes, Some(41_943_040));
        assert_eq!(status.cpu_usage, Some(Duration::from_millis(1500)));
        assert_eq!(status.tasks, Some(4));
    }

    #[test]
    fn test_parse_stopped_unit() {
        let output = "ActiveState=inactive\nMainPID=0\nActiveEnterTimestampMonotonic=0\n\
                      MemoryCurrent=[not set]\nCPUUsageNSec=18446744073709551615\nTasksCurrent=[not set]\n";
        let status = parse_show_output(output, Some(100.0));

        assert_eq!(status.state, ServiceState::Stopped);
        assert_eq!(status, UnitStatus::with_state(ServiceState::Stopped));
    }

    #[test]
    fn test_active_state_mapping() {
        assert_eq!(map_active_state("failed"), ServiceState::Failed);
        assert_eq!(map_active_state("activating"), ServiceState::Starting);
        assert_eq!(map_active_state("reloading"), ServiceState::Running);
        assert_eq!(map_active_state("maintenance"), ServiceState::Unknown);
        assert_eq!(parse_show_output("", None).state, ServiceState::Unknown);
    }
}
