//! Per-service manager.
//!
//! Owns one service's config file and lifecycle. `apply` renders the
//! config, writes it through the store, activates it and restores the
//! previous file if the service rejects it.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{ControlErrorKind, DaemonError, DaemonResult};
use crate::executor::with_timeout;
use crate::store::{BackupHandle, ConfigBackup, ConfigStore};
use crate::templates::TemplateEngine;

use super::controller::{ProcessController, UnitStatus};
use super::directives::restart_required;
use super::model::{
    select_shares, ControlAction, ServiceDefinition, ServiceState, ServiceStatus, ServiceType,
    ShareRecord,
};
use super::traits::ServiceKind;

/// Extra time granted to a controller to report its own timeout.
const CONTROL_GRACE: Duration = Duration::from_secs(1);

/// Interval between status polls while a unit is starting or stopping.
const SETTLE_POLL: Duration = Duration::from_millis(100);

/// How a written config was brought into effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApplyAction {
    /// Rendered config matched the file on disk.
    Unchanged,
    Reloaded,
    Restarted,
    /// Service was not running and the definition asks for auto start.
    Started,
    /// Service not running; the config takes effect on next start.
    Deferred,
}

impl ApplyAction {
    fn control(self) -> Option<ControlAction> {
        match self {
            ApplyAction::Reloaded => Some(ControlAction::Reload),
            ApplyAction::Restarted => Some(ControlAction::Restart),
            ApplyAction::Started => Some(ControlAction::Start),
            ApplyAction::Unchanged | ApplyAction::Deferred => None,
        }
    }

    /// Action that returns the service to its prior state once the old
    /// config is back. `now` is the state observed after the restore; a
    /// unit that went down cannot be reloaded and is restarted instead.
    fn recovery(self, now: ServiceState) -> Option<ControlAction> {
        match self {
            ApplyAction::Started => Some(ControlAction::Stop),
            ApplyAction::Reloaded if now == ServiceState::Running => Some(ControlAction::Reload),
            ApplyAction::Reloaded | ApplyAction::Restarted => Some(ControlAction::Restart),
            ApplyAction::Unchanged | ApplyAction::Deferred => None,
        }
    }
}

/// Why an apply was rolled back.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyFailure {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl From<&DaemonError> for ApplyFailure {
    fn from(error: &DaemonError) -> Self {
        Self {
            code: error.code(),
            message: error.to_string(),
            details: error.details(),
        }
    }
}

/// Outcome of an apply.
///
/// `success` means the new config is on disk and, unless deferred, the
/// service accepted it. `rolled_back` means the previous file was
/// restored after the service rejected the new one.
#[derive(Debug, Clone, Serialize)]
pub struct ApplyResult {
    pub service: ServiceType,
    pub config_path: PathBuf,
    pub success: bool,
    pub changed: bool,
    pub rolled_back: bool,
    pub action: ApplyAction,
    /// SHA-256 of the rendered config.
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup: Option<ConfigBackup>,
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<ApplyFailure>,
}

/// Manages one service's config and lifecycle.
pub struct ServiceManager {
    kind: Arc<dyn ServiceKind>,
    unit: String,
    config_path: PathBuf,
    engine: TemplateEngine,
    store: Arc<ConfigStore>,
    controller: Arc<dyn ProcessController>,
    control_timeout: Duration,
    status_timeout: Duration,
    /// Held for the whole of an apply or control transition.
    mutation: Mutex<()>,
}

impl ServiceManager {
    pub fn new(
        kind: Arc<dyn ServiceKind>,
        unit: impl Into<String>,
        config_path: impl Into<PathBuf>,
        engine: TemplateEngine,
        store: Arc<ConfigStore>,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        Self {
            kind,
            unit: unit.into(),
            config_path: config_path.into(),
            engine,
            store,
            controller,
            control_timeout: Duration::from_secs(5),
            status_timeout: Duration::from_secs(2),
            mutation: Mutex::new(()),
        }
    }

    pub fn with_timeouts(mut self, control: Duration, status: Duration) -> Self {
        self.control_timeout = control;
        self.status_timeout = status;
        self
    }

    /// Longest a start, stop or restart can take: one status query, the
    /// control call and the settle wait.
    pub fn control_budget(&self) -> Duration {
        self.status_timeout + self.call_deadline() + self.settle_budget()
    }

    /// Longest an apply can take. The status query before writing, the
    /// syntax check, activation and settle wait, then a rollback's status
    /// query, recovery call and second settle wait.
    pub fn apply_budget(&self) -> Duration {
        self.status_timeout * 2 + self.call_deadline() * 3 + self.settle_budget() * 2
    }

    fn call_deadline(&self) -> Duration {
        self.control_timeout + CONTROL_GRACE
    }

    /// The last poll may start one interval past the deadline.
    fn settle_budget(&self) -> Duration {
        self.control_timeout + SETTLE_POLL + self.status_timeout
    }

    pub fn service_type(&self) -> ServiceType {
        self.kind.service_type()
    }

    pub fn name(&self) -> &'static str {
        self.kind.service_type().as_str()
    }

    pub fn display_name(&self) -> &'static str {
        self.kind.display_name()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Render the config for `definition` and `shares` without touching
    /// the filesystem.
    pub fn render(
        &self,
        definition: &ServiceDefinition,
        shares: &[ShareRecord],
    ) -> DaemonResult<String> {
        if definition.service_type != self.service_type() {
            return Err(DaemonError::invalid(
                "service_type",
                format!(
                    "{} definition sent to the {} manager",
                    definition.service_type,
                    self.name()
                ),
            ));
        }

        let selected = select_shares(definition, shares)?;
        let context = self.kind.render_context(definition, &selected)?;
        self.engine.render(self.kind.template(), &context)
    }

    /// Render, write and activate a new config.
    ///
    /// Validation, render and write failures leave the file untouched and
    /// are returned as errors. A config the service rejects is rolled back
    /// and reported as `success: false, rolled_back: true`. Only a failed
    /// restore surfaces as `RollbackFailed`.
    pub fn apply(
        &self,
        definition: &ServiceDefinition,
        shares: &[ShareRecord],
    ) -> DaemonResult<ApplyResult> {
        let _guard = self.lock()?;

        let rendered = self.render(definition, shares)?;

        // Without a known state there is no safe way to activate or verify.
        let current = self.status();
        if current.state == ServiceState::Unknown {
            return Err(DaemonError::Control {
                kind: ControlErrorKind::StateUnknown {
                    unit: self.unit.clone(),
                },
            });
        }

        let previous = self.store.read(&self.config_path)?;
        let handle = self.store.write(&self.config_path, &rendered)?;

        if !handle.changed {
            info!(service = %self.name(), hash = %handle.content_hash, "Config unchanged");
            return Ok(self.result(handle, ApplyAction::Unchanged, current.state, None));
        }

        let action = self.plan(
            current.state,
            definition.auto_start,
            previous.as_deref(),
            &rendered,
        );
        debug!(service = %self.name(), state = %current.state, action = ?action, "Activating config");

        match self.activate(action) {
            Ok(state) => {
                info!(
                    service = %self.name(),
                    action = ?action,
                    hash = %handle.content_hash,
                    "Config applied"
                );
                Ok(self.result(handle, action, state, None))
            }
            Err(cause) => self.roll_back(handle, action, cause),
        }
    }

    /// Observe the service now. Query errors and timeouts yield `unknown`.
    pub fn status(&self) -> ServiceStatus {
        let controller = Arc::clone(&self.controller);
        let unit = self.unit.clone();

        let observed = match with_timeout(self.status_timeout, move || controller.status(&unit)) {
            Some(Ok(status)) => status,
            Some(Err(e)) => {
                warn!(service = %self.name(), error = %e, "Status query failed");
                UnitStatus::with_state(ServiceState::Unknown)
            }
            None => {
                warn!(
                    service = %self.name(),
                    timeout_ms = self.status_timeout.as_millis() as u64,
                    "Status query timed out"
                );
                UnitStatus::with_state(ServiceState::Unknown)
            }
        };

        let mut status = ServiceStatus::bare(self.service_type(), &self.unit, observed.state);
        status.pid = observed.pid;
        status.uptime_seconds = observed.uptime.map(|d| d.as_secs());
        status.memory_bytes = observed.memory_bytes;
        status.cpu_seconds = observed.cpu_usage.map(|d| d.as_secs_f64());
        status.tasks = observed.tasks;
        status
    }

    pub fn start(&self) -> DaemonResult<ServiceStatus> {
        self.transition(ControlAction::Start)
    }

    pub fn stop(&self) -> DaemonResult<ServiceStatus> {
        self.transition(ControlAction::Stop)
    }

    pub fn restart(&self) -> DaemonResult<ServiceStatus> {
        self.transition(ControlAction::Restart)
    }

    /// Backups of this service's config file, oldest first.
    pub fn backups(&self) -> DaemonResult<Vec<ConfigBackup>> {
        self.store.list_backups(&self.config_path)
    }

    pub fn prune_backups(&self, keep: usize) -> DaemonResult<Vec<ConfigBackup>> {
        let _guard = self.lock()?;
        self.store.prune_backups(&self.config_path, keep)
    }

    fn lock(&self) -> DaemonResult<MutexGuard<'_, ()>> {
        match self.mutation.try_lock() {
            Ok(guard) => Ok(guard),
            Err(TryLockError::WouldBlock) => Err(DaemonError::ConcurrentModification {
                service: self.name().to_string(),
            }),
            // A panicked apply leaves no state behind the mutex.
            Err(TryLockError::Poisoned(poisoned)) => Ok(poisoned.into_inner()),
        }
    }

    fn transition(&self, action: ControlAction) -> DaemonResult<ServiceStatus> {
        let _guard = self.lock()?;
        let current = self.status();

        match (action, current.state) {
            (ControlAction::Start, ServiceState::Running)
            | (ControlAction::Stop, ServiceState::Stopped) => return Ok(current),
            _ => {}
        }

        if !current.state.permits(action) {
            return Err(DaemonError::Control {
                kind: ControlErrorKind::InvalidTransition {
                    service: self.name().to_string(),
                    state: current.state.to_string(),
                    action: action.to_string(),
                },
            });
        }

        info!(service = %self.name(), unit = %self.unit, action = %action, "Controlling service");
        self.run_control(action)?;
        Ok(self.wait_settled())
    }

    /// Reload unless a restart-only directive changed. Services that are
    /// not running pick the file up on their next start, or are started
    /// now when `auto_start` is set.
    fn plan(
        &self,
        state: ServiceState,
        auto_start: bool,
        previous: Option<&[u8]>,
        rendered: &str,
    ) -> ApplyAction {
        if !state.is_active() {
            return if auto_start && state.permits(ControlAction::Start) {
                ApplyAction::Started
            } else {
                ApplyAction::Deferred
            };
        }

        let needs_restart = match previous {
            Some(bytes) => restart_required(
                &String::from_utf8_lossy(bytes),
                rendered,
                self.kind.restart_directives(),
            ),
            None => true,
        };

        if needs_restart {
            ApplyAction::Restarted
        } else {
            ApplyAction::Reloaded
        }
    }

    /// Check the written config, then reload or restart and confirm the
    /// service is running.
    fn activate(&self, action: ApplyAction) -> DaemonResult<ServiceState> {
        if let Some(command) = self.kind.check_command(&self.config_path) {
            self.run_check(command)?;
        }

        let Some(control) = action.control() else {
            return Ok(self.status().state);
        };

        self.run_control(control)?;

        let status = self.wait_settled();
        if status.state != ServiceState::Running {
            return Err(DaemonError::Control {
                kind: ControlErrorKind::Failed {
                    unit: self.unit.clone(),
                    action: control.to_string(),
                    exit_code: None,
                    stderr: format!("service is {} after {}", status.state, control),
                },
            });
        }

        Ok(status.state)
    }

    fn roll_back(
        &self,
        handle: BackupHandle,
        action: ApplyAction,
        cause: DaemonError,
    ) -> DaemonResult<ApplyResult> {
        warn!(
            service = %self.name(),
            error = %cause,
            "Service rejected new config, rolling back"
        );

        if let Err(restore_error) = self.store.restore(&handle) {
            error!(
                service = %self.name(),
                error = %restore_error,
                "Rollback failed, config file may be inconsistent"
            );
            return Err(DaemonError::RollbackFailed {
                service: self.name().to_string(),
                cause: cause.to_string(),
                restore_error: restore_error.to_string(),
            });
        }

        let mut failure = ApplyFailure::from(&cause);
        let state = match action.recovery(self.status().state) {
            Some(control) => {
                if let Err(e) = self.run_control(control) {
                    error!(
                        service = %self.name(),
                        action = %control,
                        error = %e,
                        "Service did not recover after rollback"
                    );
                    failure.message =
                        format!("{}; {} after rollback also failed: {}", failure.message, control, e);
                }
                self.wait_settled().state
            }
            None => self.status().state,
        };
        let mut result = self.result(handle, action, state, Some(failure));
        result.success = false;
        result.changed = false;
        result.rolled_back = true;
        Ok(result)
    }

    fn result(
        &self,
        handle: BackupHandle,
        action: ApplyAction,
        state: ServiceState,
        failure: Option<ApplyFailure>,
    ) -> ApplyResult {
        ApplyResult {
            service: self.service_type(),
            config_path: handle.path,
            success: failure.is_none(),
            changed: handle.changed,
            rolled_back: false,
            action,
            content_hash: handle.content_hash,
            backup: handle.backup,
            state,
            failure,
        }
    }

    fn run_control(&self, action: ControlAction) -> DaemonResult<()> {
        let controller = Arc::clone(&self.controller);
        let unit = self.unit.clone();
        let deadline = self.call_deadline();

        with_timeout(deadline, move || controller.control(&unit, action)).unwrap_or_else(|| {
            Err(DaemonError::Control {
                kind: ControlErrorKind::Timeout {
                    unit: self.unit.clone(),
                    action: action.to_string(),
                    timeout_secs: deadline.as_secs(),
                },
            })
        })
    }

    fn run_check(&self, command: Vec<String>) -> DaemonResult<()> {
        let controller = Arc::clone(&self.controller);
        let deadline = self.call_deadline();
        let program = command.first().cloned().unwrap_or_default();

        with_timeout(deadline, move || controller.check(&command)).unwrap_or_else(|| {
            Err(DaemonError::Control {
                kind: ControlErrorKind::Timeout {
                    unit: program,
                    action: "check".to_string(),
                    timeout_secs: deadline.as_secs(),
                },
            })
        })
    }

    fn wait_settled(&self) -> ServiceStatus {
        let deadline = Instant::now() + self.control_timeout;
        loop {
            let status = self.status();
            let transient = matches!(status.state, ServiceState::Starting | ServiceState::Stopping);
            if !transient || Instant::now() >= deadline {
                return status;
            }
            thread::sleep(SETTLE_POLL);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::model::{ServiceConfig, SmbConfig};
    use crate::services::samba::SambaKind;
    use std::fs;
    use std::sync::Mutex as StdMutex;

    /// In-memory unit with systemd's rules: reload needs a running unit.
    /// `reject_marker` in the config makes control calls fail; `crash_marker`
    /// lets them succeed but leaves the unit failed.
    struct FakeController {
        state: StdMutex<ServiceState>,
        config_path: PathBuf,
        reject_marker: Option<&'static str>,
        crash_marker: Option<&'static str>,
        reported_state: Option<ServiceState>,
        status_error: bool,
        status_delay: Duration,
        calls: StdMutex<Vec<String>>,
    }

    impl FakeController {
        fn new(config_path: &Path, state: ServiceState) -> Self {
            Self {
                state: StdMutex::new(state),
                config_path: config_path.to_path_buf(),
                reject_marker: None,
                crash_marker: None,
                reported_state: None,
                status_error: false,
                status_delay: Duration::ZERO,
                calls: StdMutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProcessController for FakeController {
        fn control(&self, unit: &str, action: ControlAction) -> Result<(), DaemonError> {
            self.calls.lock().unwrap().push(action.to_string());
            let config = fs::read_to_string(&self.config_path).unwrap_or_default();
            let contains = |marker: Option<&str>| marker.map(|m| config.contains(m)).unwrap_or(false);

            let mut state = self.state.lock().unwrap();
            if action == ControlAction::Reload && *state != ServiceState::Running {
                return Err(DaemonError::Control {
                    kind: ControlErrorKind::Failed {
                        unit: unit.to_string(),
                        action: action.to_string(),
                        exit_code: Some(1),
                        stderr: "Unit is not active, cannot reload.".to_string(),
                    },
                });
            }
            if contains(self.crash_marker) && action != ControlAction::Stop {
                *state = ServiceState::Failed;
                return Ok(());
            }
            if contains(self.reject_marker) && action != ControlAction::Stop {
                *state = ServiceState::Failed;
                return Err(DaemonError::Control {
                    kind: ControlErrorKind::Failed {
                        unit: unit.to_string(),
                        action: action.to_string(),
                        exit_code: Some(1),
                        stderr: "bad config".to_string(),
                    },
                });
            }
            *state = match action {
                ControlAction::Stop => ServiceState::Stopped,
                _ => ServiceState::Running,
            };
            Ok(())
        }

        fn status(&self, unit: &str) -> Result<UnitStatus, DaemonError> {
            thread::sleep(self.status_delay);
            if self.status_error {
                return Err(DaemonError::Control {
                    kind: ControlErrorKind::Failed {
                        unit: unit.to_string(),
                        action: "show".to_string(),
                        exit_code: Some(1),
                        stderr: "Failed to connect to bus".to_string(),
                    },
                });
            }
            let state = self.reported_state.unwrap_or(*self.state.lock().unwrap());
            Ok(UnitStatus::with_state(state))
        }

        fn check(&self, _command: &[String]) -> Result<(), DaemonError> {
            Ok(())
        }
    }

    struct NoCheckSamba;

    impl ServiceKind for NoCheckSamba {
        fn service_type(&self) -> ServiceType {
            SambaKind.service_type()
        }
        fn display_name(&self) -> &'static str {
            SambaKind.display_name()
        }
        fn template(&self) -> &'static str {
            SambaKind.template()
        }
        fn render_context(
            &self,
            definition: &ServiceDefinition,
            shares: &[&ShareRecord],
        ) -> Result<serde_json::Value, DaemonError> {
            SambaKind.render_context(definition, shares)
        }
        fn restart_directives(&self) -> &'static [&'static str] {
            SambaKind.restart_directives()
        }
    }

    fn manager(dir: &Path, controller: Arc<FakeController>) -> ServiceManager {
        ServiceManager::new(
            Arc::new(NoCheckSamba),
            "smbd",
            dir.join("smb.conf"),
            TemplateEngine::builtin().unwrap(),
            Arc::new(ConfigStore::new(dir.join("backups"))),
            controller,
        )
        .with_timeouts(Duration::from_secs(2), Duration::from_millis(200))
    }

    fn definition() -> ServiceDefinition {
        ServiceDefinition::new(ServiceConfig::Smb(SmbConfig::default()))
    }

    fn share(name: &str, path: &str) -> ShareRecord {
        ShareRecord::new(name, path, ServiceType::Smb)
    }

    #[test]
    fn test_apply_reloads_running_service() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeController::new(&dir.path().join("smb.conf"), ServiceState::Running));
        let manager = manager(dir.path(), Arc::clone(&controller));

        manager.apply(&definition(), &[share("docs", "/mnt/docs")]).unwrap();
        let result = manager
            .apply(&definition(), &[share("docs", "/mnt/docs"), share("media", "/mnt/media")])
            .unwrap();

        assert!(result.success);
        assert_eq!(result.action, ApplyAction::Reloaded);
        assert!(result.backup.is_some());
        assert_eq!(controller.calls().last().unwrap(), "reload");
    }

    #[test]
    fn test_interface_change_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeController::new(&dir.path().join("smb.conf"), ServiceState::Running));
        let manager = manager(dir.path(), Arc::clone(&controller));
        manager.apply(&definition(), &[]).unwrap();

        let mut bound = definition();
        if let ServiceConfig::Smb(config) = &mut bound.configuration {
            config.interfaces = vec!["eth0".to_string()];
        }
        let result = manager.apply(&bound, &[]).unwrap();
        assert_eq!(result.action, ApplyAction::Restarted);
    }

    #[test]
    fn test_stopped_service_is_deferred() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeController::new(&dir.path().join("smb.conf"), ServiceState::Stopped));
        let manager = manager(dir.path(), Arc::clone(&controller));

        let result = manager.apply(&definition(), &[share("docs", "/mnt/docs")]).unwrap();
        assert!(result.success);
        assert_eq!(result.action, ApplyAction::Deferred);
        assert_eq!(result.state, ServiceState::Stopped);
        assert!(controller.calls().is_empty());
        assert!(dir.path().join("smb.conf").exists());
    }

    #[test]
    fn test_auto_start_starts_stopped_service() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeController::new(&dir.path().join("smb.conf"), ServiceState::Stopped));
        let manager = manager(dir.path(), Arc::clone(&controller));
        let mut definition = definition();
        definition.auto_start = true;

        let result = manager.apply(&definition, &[share("docs", "/mnt/docs")]).unwrap();
        assert!(result.success);
        assert_eq!(result.action, ApplyAction::Started);
        assert_eq!(result.state, ServiceState::Running);
        assert_eq!(controller.calls(), vec!["start"]);
    }

    #[test]
    fn test_failed_auto_start_is_stopped_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smb.conf");
        let mut fake = FakeController::new(&path, ServiceState::Stopped);
        fake.reject_marker = Some("/mnt/broken");
        let controller = Arc::new(fake);
        let manager = manager(dir.path(), Arc::clone(&controller));
        let mut definition = definition();
        definition.auto_start = true;

        let result = manager.apply(&definition, &[share("docs", "/mnt/broken")]).unwrap();
        assert!(result.rolled_back);
        assert!(!path.exists());
        assert_eq!(result.state, ServiceState::Stopped);
        assert_eq!(controller.calls(), vec!["start", "stop"]);
    }

    #[test]
    fn test_unchanged_apply_skips_reload() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeController::new(&dir.path().join("smb.conf"), ServiceState::Running));
        let manager = manager(dir.path(), Arc::clone(&controller));
        let shares = [share("docs", "/mnt/docs")];

        let first = manager.apply(&definition(), &shares).unwrap();
        let calls = controller.calls().len();
        let second = manager.apply(&definition(), &shares).unwrap();

        assert_eq!(second.action, ApplyAction::Unchanged);
        assert!(!second.changed);
        assert_eq!(first.content_hash, second.content_hash);
        assert_eq!(controller.calls().len(), calls);
    }

    #[test]
    fn test_rejected_config_is_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smb.conf");
        let mut fake = FakeController::new(&path, ServiceState::Running);
        fake.reject_marker = Some("/mnt/broken");
        let controller = Arc::new(fake);
        let manager = manager(dir.path(), Arc::clone(&controller));

        manager.apply(&definition(), &[share("docs", "/mnt/docs")]).unwrap();
        let before = fs::read(&path).unwrap();

        let result = manager
            .apply(&definition(), &[share("docs", "/mnt/broken")])
            .unwrap();

        assert!(!result.success);
        assert!(result.rolled_back);
        assert_eq!(result.failure.as_ref().unwrap().code, "SERVICE_CONTROL_ERROR");
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(result.state, ServiceState::Running);
        assert_eq!(manager.status().state, ServiceState::Running);
    }

    #[test]
    fn test_failed_service_only_starts() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeController::new(&dir.path().join("smb.conf"), ServiceState::Failed));
        let manager = manager(dir.path(), Arc::clone(&controller));

        let err = manager.restart().unwrap_err();
        assert!(matches!(
            err,
            DaemonError::Control {
                kind: ControlErrorKind::InvalidTransition { .. }
            }
        ));
        assert_eq!(manager.start().unwrap().state, ServiceState::Running);
        assert_eq!(manager.stop().unwrap().state, ServiceState::Stopped);
    }

    #[test]
    fn test_slow_status_query_is_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let mut fake = FakeController::new(&dir.path().join("smb.conf"), ServiceState::Running);
        fake.status_delay = Duration::from_secs(1);
        let manager = manager(dir.path(), Arc::new(fake));

        let started = Instant::now();
        assert_eq!(manager.status().state, ServiceState::Unknown);
        assert!(started.elapsed() < Duration::from_millis(900));
    }

    #[test]
    fn test_render_rejects_line_breaks() {
        let dir = tempfile::tempdir().unwrap();
        let controller = Arc::new(FakeController::new(&dir.path().join("smb.conf"), ServiceState::Running));
        let manager = manager(dir.path(), controller);

        let err = manager
            .apply(&definition(), &[share("docs", "/mnt/docs\nguest ok = yes")])
            .unwrap_err();
        assert_eq!(err.code(), "RENDER_ERROR");
        assert!(!dir.path().join("smb.conf").exists());
    }

    #[test]
    fn test_unit_crashed_by_reload_is_restarted_on_old_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smb.conf");
        let mut fake = FakeController::new(&path, ServiceState::Running);
        fake.crash_marker = Some("/mnt/crash");
        let controller = Arc::new(fake);
        let manager = manager(dir.path(), Arc::clone(&controller));

        manager.apply(&definition(), &[share("docs", "/mnt/docs")]).unwrap();
        let before = fs::read(&path).unwrap();
        let calls_before = controller.calls().len();

        let result = manager
            .apply(&definition(), &[share("docs", "/mnt/crash")])
            .unwrap();

        assert!(result.rolled_back);
        assert_eq!(fs::read(&path).unwrap(), before);
        assert_eq!(controller.calls()[calls_before..], ["reload", "restart"]);
        assert_eq!(result.state, ServiceState::Running);
        assert_eq!(manager.status().state, ServiceState::Running);
        assert!(!result.failure.unwrap().message.contains("after rollback also failed"));
    }

    #[test]
    fn test_unknown_state_refuses_apply() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smb.conf");
        let mut fake = FakeController::new(&path, ServiceState::Running);
        fake.status_error = true;
        let controller = Arc::new(fake);
        let manager = manager(dir.path(), Arc::clone(&controller));

        let err = manager.apply(&definition(), &[share("docs", "/mnt/docs")]).unwrap_err();

        assert_eq!(err.code(), "SERVICE_CONTROL_ERROR");
        assert!(matches!(
            err,
            DaemonError::Control {
                kind: ControlErrorKind::StateUnknown { .. }
            }
        ));
        assert!(!path.exists());
        assert!(controller.calls().is_empty());
    }

    #[test]
    fn test_slowest_apply_fits_budget() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("smb.conf");
        let mut fake = FakeController::new(&path, ServiceState::Running);
        fake.reported_state = Some(ServiceState::Starting);
        fake.status_delay = Duration::from_millis(40);
        let controller = Arc::new(fake);
        let manager = ServiceManager::new(
            Arc::new(NoCheckSamba),
            "smbd",
            &path,
            TemplateEngine::builtin().unwrap(),
            Arc::new(ConfigStore::new(dir.path().join("backups"))),
            Arc::clone(&controller) as Arc<dyn ProcessController>,
        )
        .with_timeouts(Duration::from_millis(300), Duration::from_millis(50));
        fs::write(&path, "[global]\n").unwrap();

        let started = Instant::now();
        let result = manager.apply(&definition(), &[share("docs", "/mnt/docs")]).unwrap();

        assert!(result.rolled_back);
        assert!(started.elapsed() <= manager.apply_budget());
        assert!(manager.control_budget() < manager.apply_budget());
    }
}
