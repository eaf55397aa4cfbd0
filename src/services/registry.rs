//! Service registry.
//!
//! Central registry of the managers for every enabled service.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::info;

use crate::config::Settings;
use crate::error::{DaemonError, ValidationErrorKind};
use crate::store::ConfigStore;
use crate::templates::TemplateEngine;

use super::controller::ProcessController;
use super::manager::ServiceManager;
use super::model::{ServiceState, ServiceStatus, ServiceType};
use super::nfs::NfsKind;
use super::samba::SambaKind;
use super::traits::ServiceKind;
use super::vsftpd::VsftpdKind;

/// Built-in kind for a service type.
pub fn kind_for(service_type: ServiceType) -> Arc<dyn ServiceKind> {
    match service_type {
        ServiceType::Smb => Arc::new(SambaKind),
        ServiceType::Nfs => Arc::new(NfsKind),
        ServiceType::Ftp => Arc::new(VsftpdKind),
    }
}

/// Registry of service managers, keyed by service type.
#[derive(Default)]
pub struct ServiceRegistry {
    managers: BTreeMap<ServiceType, Arc<ServiceManager>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build managers for every service enabled in `settings`.
    pub fn from_settings(
        settings: &Settings,
        engine: TemplateEngine,
        store: Arc<ConfigStore>,
        controller: Arc<dyn ProcessController>,
    ) -> Self {
        let mut registry = Self::new();

        for service_type in ServiceType::ALL {
            let service = settings.services.get(service_type);
            if !service.enabled {
                info!(service = %service_type, "Service disabled in configuration");
                continue;
            }

            let manager = ServiceManager::new(
                kind_for(service_type),
                service.unit.clone(),
                service.config_path.clone(),
                engine.clone(),
                Arc::clone(&store),
                Arc::clone(&controller),
            )
            .with_timeouts(
                settings.limits.control_timeout(),
                settings.limits.status_timeout(),
            );
            registry.register(manager);
        }

        info!(
            count = registry.managers.len(),
            services = ?registry.list(),
            "Service registry initialized"
        );

        registry
    }

    /// Register a manager, replacing any existing one of the same type.
    pub fn register(&mut self, manager: ServiceManager) {
        self.managers
            .insert(manager.service_type(), Arc::new(manager));
    }

    pub fn get(&self, service_type: ServiceType) -> Option<Arc<ServiceManager>> {
        self.managers.get(&service_type).cloned()
    }

    /// Look up a manager by name, rejecting unknown and disabled services.
    pub fn resolve(&self, name: &str) -> Result<Arc<ServiceManager>, DaemonError> {
        let service_type: ServiceType = name.parse()?;
        self.get(service_type).ok_or_else(|| DaemonError::Validation {
            kind: ValidationErrorKind::ServiceDisabled {
                service: service_type.to_string(),
            },
        })
    }

    pub fn managers(&self) -> impl Iterator<Item = &Arc<ServiceManager>> {
        self.managers.values()
    }

    /// List registered service names.
    pub fn list(&self) -> Vec<&'static str> {
        self.managers.keys().map(|t| t.as_str()).collect()
    }

    pub fn count(&self) -> usize {
        self.managers.len()
    }

    /// Longest apply any registered service can take.
    pub fn apply_budget(&self) -> Duration {
        self.managers().map(|m| m.apply_budget()).max().unwrap_or_default()
    }

    /// Longest start, stop or restart any registered service can take.
    pub fn control_budget(&self) -> Duration {
        self.managers().map(|m| m.control_budget()).max().unwrap_or_default()
    }

    /// Observe every registered service, all at once.
    ///
    /// Each observation runs under its manager's status deadline, so the
    /// whole call takes about one deadline however many units hang.
    pub fn statuses(&self) -> Vec<ServiceStatus> {
        thread::scope(|scope| {
            let pending: Vec<_> = self
                .managers
                .values()
                .map(|manager| (manager, scope.spawn(move || manager.status())))
                .collect();

            pending
                .into_iter()
                .map(|(manager, handle)| {
                    handle.join().unwrap_or_else(|_| {
                        ServiceStatus::bare(manager.service_type(), manager.unit(), ServiceState::Unknown)
                    })
                })
                .collect()
        })
    }
}
