//! Apply and lifecycle tests against the public service registry.
//!
//! A scripted controller stands in for systemd so rollbacks, syntax-check
//! rejections and concurrent applies can be driven deterministically.

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use nas_daemon::config::{HealthConfig, Settings};
use nas_daemon::error::{ControlErrorKind, DaemonError};
use nas_daemon::health::{HealthChecker, HealthStatus, NoDatabase};
use nas_daemon::services::{
    ApplyAction, ControlAction, ProcessController, ServiceConfig, ServiceDefinition,
    ServiceRegistry, ServiceState, ServiceType, ShareRecord, SmbConfig, UnitStatus,
};
use nas_daemon::store::ConfigStore;
use nas_daemon::templates::TemplateEngine;

/// Text that makes the scripted syntax check fail.
const BAD_MARKER: &str = "/srv/broken";

#[derive(Default)]
struct ScriptedController {
    states: Mutex<HashMap<String, ServiceState>>,
    calls: Mutex<Vec<String>>,
    /// When set, reloads report entry and then wait for a release.
    gate: Option<(Mutex<Sender<()>>, Mutex<Receiver<()>>)>,
    /// The next reload succeeds but leaves the unit failed.
    crash_next_reload: Mutex<bool>,
}

impl ScriptedController {
    fn running(units: &[&str]) -> Self {
        let controller = Self::default();
        for unit in units {
            controller.set(unit, ServiceState::Running);
        }
        controller
    }

    fn set(&self, unit: &str, state: ServiceState) {
        self.states.lock().unwrap().insert(unit.to_string(), state);
    }

    fn state(&self, unit: &str) -> ServiceState {
        self.states
            .lock()
            .unwrap()
            .get(unit)
            .copied()
            .unwrap_or(ServiceState::Stopped)
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl ProcessController for ScriptedController {
    fn control(&self, unit: &str, action: ControlAction) -> Result<(), DaemonError> {
        self.calls.lock().unwrap().push(format!("{} {}", action, unit));

        // systemd refuses to reload a unit that is not active.
        if action == ControlAction::Reload && self.state(unit) != ServiceState::Running {
            return Err(DaemonError::Control {
                kind: ControlErrorKind::Failed {
                    unit: unit.to_string(),
                    action: "reload".to_string(),
                    exit_code: Some(1),
                    stderr: format!("Unit {}.service is not active, cannot reload.", unit),
                },
            });
        }

        if let (ControlAction::Reload, Some((entered, release))) = (action, &self.gate) {
            entered.lock().unwrap().send(()).unwrap();
            release.lock().unwrap().recv().unwrap();
        }

        let state = match action {
            ControlAction::Stop => ServiceState::Stopped,
            ControlAction::Reload if std::mem::take(&mut *self.crash_next_reload.lock().unwrap()) => {
                ServiceState::Failed
            }
            _ => ServiceState::Running,
        };
        self.set(unit, state);
        Ok(())
    }

    fn status(&self, unit: &str) -> Result<UnitStatus, DaemonError> {
        Ok(UnitStatus::with_state(self.state(unit)))
    }

    fn check(&self, command: &[String]) -> Result<(), DaemonError> {
        let path = command.last().cloned().unwrap_or_default();
        let config = fs::read_to_string(&path).unwrap_or_default();
        if config.contains(BAD_MARKER) {
            return Err(DaemonError::Control {
                kind: ControlErrorKind::Failed {
                    unit: command[0].clone(),
                    action: "check".to_string(),
                    exit_code: Some(1),
                    stderr: format!("{}: path does not exist", BAD_MARKER),
                },
            });
        }
        Ok(())
    }
}

fn settings(dir: &Path) -> Settings {
    let mut settings = Settings::with_socket(dir.join("nas.sock"));
    settings.services.smb.config_path = dir.join("smb.conf");
    settings.services.nfs.config_path = dir.join("exports");
    settings.services.ftp.config_path = dir.join("vsftpd.conf");
    settings.paths.backup_dir = dir.join("backups");
    settings
}

fn registry(dir: &Path, controller: Arc<ScriptedController>) -> Arc<ServiceRegistry> {
    let settings = settings(dir);
    Arc::new(ServiceRegistry::from_settings(
        &settings,
        TemplateEngine::builtin().unwrap(),
        Arc::new(ConfigStore::new(&settings.paths.backup_dir)),
        controller,
    ))
}

fn smb() -> ServiceDefinition {
    ServiceDefinition::new(ServiceConfig::Smb(SmbConfig::default()))
}

fn share(name: &str, path: &str) -> ShareRecord {
    ShareRecord::new(name, path, ServiceType::Smb)
}

fn setup(controller: ScriptedController) -> (TempDir, Arc<ScriptedController>, Arc<ServiceRegistry>) {
    let dir = TempDir::new().unwrap();
    let controller = Arc::new(controller);
    let registry = registry(dir.path(), Arc::clone(&controller));
    (dir, controller, registry)
}

#[test]
fn test_share_section_is_rendered_and_reloaded() {
    let (dir, controller, registry) = setup(ScriptedController::running(&["smbd"]));
    let manager = registry.resolve("smb").unwrap();

    let result = manager.apply(&smb(), &[share("docs", "/srv/docs")]).unwrap();

    assert!(result.success);
    assert_eq!(result.state, ServiceState::Running);
    let config = fs::read_to_string(dir.path().join("smb.conf")).unwrap();
    assert!(config.contains("[docs]"));
    assert!(config.contains("path = /srv/docs"));
    assert!(config.contains("read only = no"));
    assert!(controller.calls().iter().any(|c| c.ends_with("smbd")));
}

#[test]
fn test_line_break_in_share_path_writes_nothing() {
    let (dir, controller, registry) = setup(ScriptedController::running(&["smbd"]));
    let manager = registry.resolve("smb").unwrap();

    let err = manager
        .apply(&smb(), &[share("docs", "/srv/docs\n[evil]")])
        .unwrap_err();

    assert_eq!(err.code(), "RENDER_ERROR");
    assert!(!dir.path().join("smb.conf").exists());
    assert!(controller.calls().is_empty());
}

#[test]
fn test_rejected_syntax_check_restores_previous_bytes() {
    let (dir, controller, registry) = setup(ScriptedController::running(&["smbd"]));
    let manager = registry.resolve("smb").unwrap();
    let path = dir.path().join("smb.conf");

    manager.apply(&smb(), &[share("docs", "/srv/docs")]).unwrap();
    let before = fs::read(&path).unwrap();
    let calls_before = controller.calls().len();

    let result = manager
        .apply(&smb(), &[share("docs", "/srv/docs"), share("broken", BAD_MARKER)])
        .unwrap();

    assert!(!result.success);
    assert!(result.rolled_back);
    assert_eq!(result.failure.as_ref().unwrap().code, "SERVICE_CONTROL_ERROR");
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(manager.status().state, ServiceState::Running);

    // The rejected config never reached the service; only the recovery reload ran.
    let after: Vec<String> = controller.calls().into_iter().skip(calls_before).collect();
    assert_eq!(after, vec!["reload smbd".to_string()]);

    // The backup taken before the rejected write is kept.
    assert_eq!(manager.backups().unwrap().len(), 1);
}

#[test]
fn test_unit_failed_by_reload_is_restarted_on_previous_bytes() {
    let (dir, controller, registry) = setup(ScriptedController::running(&["smbd"]));
    let manager = registry.resolve("smb").unwrap();
    let path = dir.path().join("smb.conf");

    manager.apply(&smb(), &[share("docs", "/srv/docs")]).unwrap();
    let before = fs::read(&path).unwrap();
    let calls_before = controller.calls().len();

    *controller.crash_next_reload.lock().unwrap() = true;
    let result = manager
        .apply(&smb(), &[share("docs", "/srv/docs"), share("media", "/srv/media")])
        .unwrap();

    assert!(!result.success);
    assert!(result.rolled_back);
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(result.state, ServiceState::Running);
    assert_eq!(manager.status().state, ServiceState::Running);

    // A failed unit cannot be reloaded, so recovery restarts it.
    let after: Vec<String> = controller.calls().into_iter().skip(calls_before).collect();
    assert_eq!(after, vec!["reload smbd".to_string(), "restart smbd".to_string()]);
}

#[test]
fn test_unknown_unit_state_leaves_config_untouched() {
    let (dir, controller, registry) = setup(ScriptedController::running(&["smbd"]));
    let manager = registry.resolve("smb").unwrap();
    let path = dir.path().join("smb.conf");

    manager.apply(&smb(), &[share("docs", "/srv/docs")]).unwrap();
    let before = fs::read(&path).unwrap();
    let calls_before = controller.calls().len();

    controller.set("smbd", ServiceState::Unknown);
    let err = manager
        .apply(&smb(), &[share("media", "/srv/media")])
        .unwrap_err();

    assert_eq!(err.code(), "SERVICE_CONTROL_ERROR");
    assert!(matches!(
        err,
        DaemonError::Control {
            kind: ControlErrorKind::StateUnknown { .. }
        }
    ));
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(controller.calls().len(), calls_before);
    assert_eq!(manager.backups().unwrap().len(), 0);
}

#[test]
fn test_reapplying_same_definition_is_idempotent() {
    let (_dir, controller, registry) = setup(ScriptedController::running(&["smbd"]));
    let manager = registry.resolve("smb").unwrap();
    let shares = [share("docs", "/srv/docs")];

    manager.apply(&smb(), &[]).unwrap();
    let first = manager.apply(&smb(), &shares).unwrap();
    let calls = controller.calls().len();
    let second = manager.apply(&smb(), &shares).unwrap();

    assert!(first.changed);
    assert!(!second.changed);
    assert_eq!(second.action, ApplyAction::Unchanged);
    assert_eq!(first.content_hash, second.content_hash);
    assert_eq!(controller.calls().len(), calls);
    assert_eq!(manager.backups().unwrap().len(), 1);
}

#[test]
fn test_concurrent_apply_is_refused() {
    let (entered_tx, entered_rx) = channel();
    let (release_tx, release_rx) = channel();
    let controller = ScriptedController {
        gate: Some((Mutex::new(entered_tx), Mutex::new(release_rx))),
        ..ScriptedController::default()
    };
    controller.set("smbd", ServiceState::Running);

    let (dir, _controller, registry) = setup(controller);
    let manager = registry.resolve("smb").unwrap();
    // The first write has no predecessor and restarts; later writes reload.
    manager.apply(&smb(), &[]).unwrap();

    let first = {
        let manager = Arc::clone(&manager);
        thread::spawn(move || manager.apply(&smb(), &[share("docs", "/srv/docs")]))
    };
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let err = manager
        .apply(&smb(), &[share("media", "/srv/media")])
        .unwrap_err();
    assert_eq!(err.code(), "CONCURRENT_MODIFICATION");

    let err = manager.restart().unwrap_err();
    assert_eq!(err.code(), "CONCURRENT_MODIFICATION");

    release_tx.send(()).unwrap();
    let result = first.join().unwrap().unwrap();
    assert!(result.success);

    let config = fs::read_to_string(dir.path().join("smb.conf")).unwrap();
    assert!(config.contains("[docs]"));
    assert!(!config.contains("[media]"));
}

#[test]
fn test_services_are_independent() {
    let (_dir, _controller, registry) = setup(ScriptedController::running(&["smbd"]));
    let smb_manager = registry.resolve("smb").unwrap();
    let ftp_manager = registry.resolve("ftp").unwrap();

    assert_eq!(ftp_manager.status().state, ServiceState::Stopped);
    assert_eq!(ftp_manager.start().unwrap().state, ServiceState::Running);
    assert_eq!(smb_manager.stop().unwrap().state, ServiceState::Stopped);
    assert_eq!(ftp_manager.status().state, ServiceState::Running);
}

#[test]
fn test_health_follows_service_states() {
    let (dir, controller, registry) = setup(ScriptedController::running(&["smbd", "nfs-server", "vsftpd"]));
    let config = HealthConfig {
        storage_paths: vec![dir.path().to_path_buf()],
        disk_warning_percent: 100.0,
        disk_critical_percent: 100.0,
        ..HealthConfig::default()
    };
    let checker = HealthChecker::new(Arc::clone(&registry), Arc::new(NoDatabase), &config);

    let report = checker.detailed();
    assert_eq!(report.checks["services"].status, HealthStatus::Healthy);
    assert_eq!(report.checks["database"].status, HealthStatus::Healthy);

    controller.set("nfs-server", ServiceState::Stopped);
    let report = checker.detailed();
    assert_eq!(report.checks["services"].status, HealthStatus::Degraded);
    assert!(report.status.severity() >= HealthStatus::Degraded.severity());

    controller.set("vsftpd", ServiceState::Failed);
    let report = checker.detailed();
    assert_eq!(report.checks["services"].status, HealthStatus::Unhealthy);
    assert_eq!(report.status, HealthStatus::Unhealthy);
    // Readiness covers the daemon's own dependencies, not the managed units.
    assert!(checker.readiness().ready);
    assert!(checker.liveness().status.is_ok());
}
