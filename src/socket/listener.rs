//! Unix socket listener.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};

use crate::commands::{CommandDeps, CommandRegistry};
use crate::config::Settings;
use crate::error::DaemonError;
use crate::health::{probe_from_config, HealthChecker};
use crate::metrics::MetricsCollector;
use crate::services::{ProcessController, ServiceRegistry};
use crate::store::ConfigStore;
use crate::templates::TemplateEngine;

use super::handle_connection;

const DRAIN_POLL: Duration = Duration::from_millis(100);

/// Request and connection counters shared with the metrics collector.
#[derive(Debug, Default)]
pub struct ConnectionMetrics {
    pub requests_total: AtomicU64,
    pub requests_failed: AtomicU64,
    pub active_connections: AtomicUsize,
}

impl ConnectionMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self, success: bool) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
        if !success {
            self.requests_failed.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.requests_failed.load(Ordering::Relaxed)
    }

    pub fn active(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Count a connection as active until the guard drops.
    fn open(self: &Arc<Self>) -> ActiveConnection {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
        ActiveConnection(Arc::clone(self))
    }
}

struct ActiveConnection(Arc<ConnectionMetrics>);

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Unix socket server.
pub struct SocketListener {
    listener: UnixListener,
    settings: Arc<Settings>,
    command_registry: Arc<CommandRegistry>,
    services: Arc<ServiceRegistry>,
    metrics: Arc<ConnectionMetrics>,
    connection_slots: Arc<Semaphore>,
}

impl SocketListener {
    /// Build every component from `settings` and bind the control socket.
    ///
    /// `controller` drives the managed services; production passes a
    /// `SystemdController`.
    pub async fn bind(
        settings: Arc<Settings>,
        controller: Arc<dyn ProcessController>,
    ) -> Result<Self, DaemonError> {
        let metrics = Arc::new(ConnectionMetrics::new());
        let (services, command_registry) = build_components(&settings, controller, &metrics)?;

        let socket_path = &settings.socket.path;
        clear_stale_socket(socket_path)?;

        let listener = UnixListener::bind(socket_path).map_err(|e| socket_error(format!(
            "Failed to bind to socket {}: {}",
            socket_path.display(),
            e
        )))?;
        set_socket_permissions(socket_path, &settings.socket.permissions)?;

        let max_connections = settings.limits.max_concurrent_requests;
        info!(
            path = %socket_path.display(),
            max_connections,
            "Socket listener bound"
        );

        Ok(Self {
            listener,
            command_registry,
            services,
            metrics,
            connection_slots: Arc::new(Semaphore::new(max_connections)),
            settings,
        })
    }

    pub fn metrics(&self) -> Arc<ConnectionMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn services(&self) -> Arc<ServiceRegistry> {
        Arc::clone(&self.services)
    }

    /// Accept connections until `shutdown` is notified.
    ///
    /// Connections already being served keep running; see `wait_for_drain`.
    pub async fn run(&self, shutdown: Arc<Notify>) -> Result<(), DaemonError> {
        info!("Socket listener running, waiting for connections...");

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, _addr)) => self.serve(stream),
                    Err(e) => warn!(error = %e, "Failed to accept connection"),
                },
                _ = shutdown.notified() => {
                    info!("Shutdown signal received, stopping listener");
                    return Ok(());
                }
            }
        }
    }

    /// Hand `stream` to its own task, or drop it when every slot is taken.
    fn serve(&self, stream: UnixStream) {
        let Ok(slot) = Arc::clone(&self.connection_slots).try_acquire_owned() else {
            warn!(
                max = self.settings.limits.max_concurrent_requests,
                "Connection limit reached, rejecting connection"
            );
            return;
        };

        let active = self.metrics.open();
        debug!(active = self.metrics.active(), "New connection accepted");

        let settings = Arc::clone(&self.settings);
        let command_registry = Arc::clone(&self.command_registry);
        let metrics = Arc::clone(&self.metrics);

        tokio::spawn(async move {
            let _held: (OwnedSemaphorePermit, ActiveConnection) = (slot, active);
            if let Err(e) = handle_connection(stream, settings, command_registry, metrics).await {
                error!(code = e.code(), error = %e, "Connection handler error");
            }
        });
    }

    /// Wait until every active connection has closed, or `limit` passes.
    ///
    /// Returns whether the drain completed.
    pub async fn wait_for_drain(&self, limit: Duration) -> bool {
        let drained = tokio::time::timeout(limit, async {
            while self.metrics.active() > 0 {
                debug!(active = self.metrics.active(), "Waiting for connections to drain");
                tokio::time::sleep(DRAIN_POLL).await;
            }
        })
        .await
        .is_ok();

        if drained {
            info!("All connections drained");
        } else {
            warn!(active = self.metrics.active(), "Drain limit reached with connections open");
        }
        drained
    }
}

/// Wire templates, store, service managers, health and metrics into the
/// command registry.
///
/// Unusable template overrides fall back to the built-in templates.
fn build_components(
    settings: &Settings,
    controller: Arc<dyn ProcessController>,
    connections: &Arc<ConnectionMetrics>,
) -> Result<(Arc<ServiceRegistry>, Arc<CommandRegistry>), DaemonError> {
    let engine = match TemplateEngine::new(&settings.paths.templates_dir) {
        Ok(engine) => engine,
        Err(e) => {
            warn!(
                error = %e,
                dir = %settings.paths.templates_dir.display(),
                "Failed to load template overrides, using built-in templates"
            );
            TemplateEngine::builtin()?
        }
    };
    info!(templates = ?engine.list_templates(), "Templates loaded");

    let store = Arc::new(ConfigStore::new(&settings.paths.backup_dir));
    let services = Arc::new(ServiceRegistry::from_settings(
        settings, engine, store, controller,
    ));

    let health = HealthChecker::new(
        Arc::clone(&services),
        probe_from_config(&settings.database),
        &settings.health,
    );
    let collector = MetricsCollector::new(
        Arc::clone(&services),
        settings.health.storage_paths.clone(),
        Duration::from_millis(settings.metrics.cpu_sample_interval_ms),
    )
    .with_connections(Arc::clone(connections));

    let commands = CommandRegistry::new(CommandDeps {
        services: Arc::clone(&services),
        health: Arc::new(health),
        metrics: Arc::new(collector),
        metrics_prefix: settings.metrics.prefix.clone(),
    });

    Ok((services, Arc::new(commands)))
}

fn socket_error(message: String) -> DaemonError {
    DaemonError::Socket { message }
}

/// Remove a socket left by a previous run. Never follows a symlink.
fn clear_stale_socket(path: &Path) -> Result<(), DaemonError> {
    match std::fs::symlink_metadata(path) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            return Err(socket_error(format!(
                "Socket path {} is a symlink, refusing to remove it",
                path.display()
            )));
        }
        Ok(_) => std::fs::remove_file(path).map_err(|e| {
            socket_error(format!(
                "Failed to remove existing socket file {}: {}",
                path.display(),
                e
            ))
        })?,
        Err(_) => {}
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            socket_error(format!(
                "Failed to create socket directory {}: {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

fn set_socket_permissions(path: &Path, permissions: &str) -> Result<(), DaemonError> {
    let mode = u32::from_str_radix(permissions, 8).map_err(|e| {
        socket_error(format!("Invalid socket permissions '{}': {}", permissions, e))
    })?;

    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).map_err(|e| {
        socket_error(format!(
            "Failed to set socket permissions on {}: {}",
            path.display(),
            e
        ))
    })
}
