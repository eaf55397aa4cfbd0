//! Layered health checks.
//!
//! Liveness touches nothing. Readiness pings the data store and enumerates
//! the service managers. Basic adds a summary line. Detailed runs the
//! database, services, storage and system checks concurrently, each under
//! its own deadline, and folds every outcome into a [`HealthReport`].

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, warn};

use crate::config::HealthConfig;
use crate::executor::with_timeout;
use crate::metrics::system::{self, DiskUsage, LoadAverage, MemoryInfo};
use crate::services::{ServiceRegistry, ServiceState, ServiceStatus};

use super::probe::DatabaseProbe;
use super::status::{CheckResult, HealthReport, HealthStatus};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const MEMORY_DEGRADED_PERCENT: f64 = 95.0;
const LOAD_PER_CPU_DEGRADED: f64 = 2.0;

#[derive(Debug, Clone, Serialize)]
pub struct Liveness {
    pub status: HealthStatus,
    pub version: &'static str,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct Readiness {
    pub ready: bool,
    pub status: HealthStatus,
    pub checks: BTreeMap<String, CheckResult>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BasicHealth {
    pub status: HealthStatus,
    pub summary: String,
    pub timestamp: DateTime<Utc>,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub checks: BTreeMap<String, CheckResult>,
}

pub struct HealthChecker {
    registry: Arc<ServiceRegistry>,
    probe: Arc<dyn DatabaseProbe>,
    check_timeout: Duration,
    slow_threshold: Duration,
    storage_paths: Vec<PathBuf>,
    disk_warning_percent: f64,
    disk_critical_percent: f64,
    started: Instant,
}

impl HealthChecker {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        probe: Arc<dyn DatabaseProbe>,
        config: &HealthConfig,
    ) -> Self {
        Self {
            registry,
            probe,
            check_timeout: Duration::from_millis(config.check_timeout_ms),
            slow_threshold: Duration::from_millis(config.slow_threshold_ms),
            storage_paths: config.storage_paths.clone(),
            disk_warning_percent: config.disk_warning_percent,
            disk_critical_percent: config.disk_critical_percent,
            started: Instant::now(),
        }
    }

    pub fn liveness(&self) -> Liveness {
        Liveness {
            status: HealthStatus::Healthy,
            version: VERSION,
            uptime_seconds: self.started.elapsed().as_secs(),
        }
    }

    pub fn readiness(&self) -> Readiness {
        let mut checks = BTreeMap::new();
        checks.insert("database".to_string(), self.check_database());
        checks.insert("services".to_string(), self.check_registry());

        let status = HealthStatus::worst(checks.values().map(|c| c.status));
        Readiness {
            ready: status != HealthStatus::Unhealthy,
            status,
            checks,
        }
    }

    pub fn basic(&self) -> BasicHealth {
        let readiness = self.readiness();
        let report = HealthReport::from_checks(readiness.checks);

        BasicHealth {
            status: report.status,
            summary: report.summary(),
            timestamp: report.timestamp,
            version: VERSION,
            uptime_seconds: self.started.elapsed().as_secs(),
            checks: report.checks,
        }
    }

    /// Run every sub-check. Failures are folded into the report, never returned.
    pub fn detailed(&self) -> HealthReport {
        let (database, services, storage, system) = thread::scope(|scope| {
            let database = scope.spawn(|| self.check_database());
            let services = scope.spawn(|| self.check_services());
            let storage = scope.spawn(|| self.check_storage());
            let system = scope.spawn(|| self.check_system());
            (
                joined(database.join()),
                joined(services.join()),
                joined(storage.join()),
                joined(system.join()),
            )
        });

        let mut checks = BTreeMap::new();
        checks.insert("database".to_string(), database);
        checks.insert("services".to_string(), services);
        checks.insert("storage".to_string(), storage);
        checks.insert("system".to_string(), system);

        let report = HealthReport::from_checks(checks);
        if !report.status.is_ok() {
            warn!(status = %report.status, summary = %report.summary(), "Health check not healthy");
        }
        report
    }

    fn check_database(&self) -> CheckResult {
        let probe = Arc::clone(&self.probe);
        let timeout = self.check_timeout;
        self.timed("database", move || {
            probe.ping(timeout).map_err(|e| e.to_string())?;
            Ok(CheckResult::healthy().with_details(json!({ "probe": probe.name() })))
        })
    }

    fn check_registry(&self) -> CheckResult {
        let names = self.registry.list();
        CheckResult::healthy().with_details(json!({ "services": names }))
    }

    fn check_services(&self) -> CheckResult {
        let registry = Arc::clone(&self.registry);
        self.timed("services", move || Ok(evaluate_services(&registry.statuses())))
    }

    fn check_storage(&self) -> CheckResult {
        let paths = self.storage_paths.clone();
        let warning = self.disk_warning_percent;
        let critical = self.disk_critical_percent;
        self.timed("storage", move || {
            let samples: Vec<_> = paths
                .iter()
                .map(|path| (path.clone(), system::disk_usage(path).map_err(|e| e.to_string())))
                .collect();
            Ok(evaluate_storage(&samples, warning, critical))
        })
    }

    fn check_system(&self) -> CheckResult {
        self.timed("system", || {
            let cpus = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
            Ok(evaluate_system(
                system::read_memory(),
                system::read_loadavg(),
                cpus,
            ))
        })
    }

    /// Run `check` under the per-check deadline and record its duration.
    ///
    /// A successful check slower than the slow threshold is degraded.
    fn timed<F>(&self, name: &'static str, check: F) -> CheckResult
    where
        F: FnOnce() -> Result<CheckResult, String> + Send + 'static,
    {
        let started = Instant::now();
        let outcome = with_timeout(self.check_timeout, check);
        let elapsed = started.elapsed();

        let mut result = match outcome {
            Some(Ok(result)) => result,
            Some(Err(message)) => {
                debug!(check = name, error = %message, "Health check failed");
                CheckResult::unhealthy(message)
            }
            None => {
                warn!(check = name, timeout_ms = self.check_timeout.as_millis() as u64, "Health check timed out");
                CheckResult::unhealthy(format!(
                    "timed out after {}ms",
                    self.check_timeout.as_millis()
                ))
            }
        };

        if result.status == HealthStatus::Healthy && elapsed > self.slow_threshold {
            result.status = HealthStatus::Degraded;
            result.message = Some(format!(
                "slow: {}ms exceeds {}ms",
                elapsed.as_millis(),
                self.slow_threshold.as_millis()
            ));
        }
        result.duration_ms = elapsed.as_millis() as u64;
        result
    }
}

fn joined(result: thread::Result<CheckResult>) -> CheckResult {
    result.unwrap_or_else(|_| CheckResult::unhealthy("check panicked"))
}

/// Failed services are unhealthy; anything not running is degraded.
pub fn evaluate_services(statuses: &[ServiceStatus]) -> CheckResult {
    let states: BTreeMap<&str, &str> = statuses
        .iter()
        .map(|s| (s.service.as_str(), s.state.as_str()))
        .collect();

    let status = HealthStatus::worst(statuses.iter().map(|s| match s.state {
        ServiceState::Running => HealthStatus::Healthy,
        ServiceState::Failed => HealthStatus::Unhealthy,
        _ => HealthStatus::Degraded,
    }));

    let not_running: Vec<String> = statuses
        .iter()
        .filter(|s| s.state != ServiceState::Running)
        .map(|s| format!("{} is {}", s.service, s.state))
        .collect();

    let result = CheckResult::new(status).with_details(json!({ "services": states }));
    if not_running.is_empty() {
        result
    } else {
        result.with_message(not_running.join(", "))
    }
}

/// Usage at or above `critical` is unhealthy, at or above `warning` degraded.
/// A path that cannot be sampled is unhealthy.
pub fn evaluate_storage(
    samples: &[(PathBuf, Result<DiskUsage, String>)],
    warning: f64,
    critical: f64,
) -> CheckResult {
    let mut statuses = Vec::with_capacity(samples.len());
    let mut problems = Vec::new();
    let mut details = Vec::with_capacity(samples.len());

    for (path, sample) in samples {
        match sample {
            Ok(usage) => {
                let percent = usage.used_percent();
                let status = if percent >= critical {
                    HealthStatus::Unhealthy
                } else if percent >= warning {
                    HealthStatus::Degraded
                } else {
                    HealthStatus::Healthy
                };
                if !status.is_ok() {
                    problems.push(format!("{} at {:.1}%", path.display(), percent));
                }
                statuses.push(status);
                details.push(json!({
                    "path": path,
                    "status": status,
                    "used_percent": (percent * 10.0).round() / 10.0,
                    "total_bytes": usage.total_bytes,
                    "available_bytes": usage.available_bytes,
                }));
            }
            Err(error) => {
                problems.push(format!("{}: {}", path.display(), error));
                statuses.push(HealthStatus::Unhealthy);
                details.push(json!({
                    "path": path,
                    "status": HealthStatus::Unhealthy,
                    "error": error,
                }));
            }
        }
    }

    let result =
        CheckResult::new(HealthStatus::worst(statuses)).with_details(json!({ "paths": details }));
    if problems.is_empty() {
        result
    } else {
        result.with_message(problems.join(", "))
    }
}

/// Memory pressure or a load average above twice the CPU count is degraded.
pub fn evaluate_system(
    memory: Option<MemoryInfo>,
    load: Option<LoadAverage>,
    cpus: usize,
) -> CheckResult {
    if memory.is_none() && load.is_none() {
        return CheckResult::degraded("system metrics unavailable");
    }

    let mut problems = Vec::new();
    let memory_percent = memory.map(|m| m.used_percent());
    if let Some(percent) = memory_percent {
        if percent >= MEMORY_DEGRADED_PERCENT {
            problems.push(format!("memory at {:.1}%", percent));
        }
    }
    if let Some(load) = load {
        if load.one > cpus as f64 * LOAD_PER_CPU_DEGRADED {
            problems.push(format!("load {:.2} on {} cpus", load.one, cpus));
        }
    }

    let details = json!({
        "cpus": cpus,
        "memory_used_percent": memory_percent,
        "load": load,
    });

    if problems.is_empty() {
        CheckResult::healthy().with_details(details)
    } else {
        CheckResult::degraded(problems.join(", ")).with_details(details)
    }
}
