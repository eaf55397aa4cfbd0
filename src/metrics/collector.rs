//! Metrics snapshot collection.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use crate::services::{ServiceRegistry, ServiceStatus};
use crate::socket::ConnectionMetrics;

use super::system::{self, DiskUsage, LoadAverage, MemoryInfo, NetInterface};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// One sampling pass over the host, the managed services and the daemon.
///
/// Values that could not be sampled are absent, never zero.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: DateTime<Utc>,
    pub system: SystemMetrics,
    pub services: Vec<ServiceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub daemon: Option<DaemonMetrics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemMetrics {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_percent: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub load: Option<LoadAverage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<MemoryInfo>,
    pub disks: Vec<DiskUsage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<Vec<NetInterface>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<f64>,
}

/// Control socket counters.
#[derive(Debug, Clone, Serialize)]
pub struct DaemonMetrics {
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub requests_total: u64,
    pub requests_failed: u64,
    pub active_connections: usize,
}

/// Read-only sampler. Never starts, stops or reconfigures anything.
pub struct MetricsCollector {
    registry: Arc<ServiceRegistry>,
    storage_paths: Vec<PathBuf>,
    cpu_sample_interval: Duration,
    connections: Option<Arc<ConnectionMetrics>>,
    started: Instant,
}

impl MetricsCollector {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        storage_paths: Vec<PathBuf>,
        cpu_sample_interval: Duration,
    ) -> Self {
        Self {
            registry,
            storage_paths,
            cpu_sample_interval,
            connections: None,
            started: Instant::now(),
        }
    }

    /// Include control socket counters in snapshots.
    pub fn with_connections(mut self, connections: Arc<ConnectionMetrics>) -> Self {
        self.connections = Some(connections);
        self
    }

    pub fn collect(&self) -> MetricsSnapshot {
        // Service probes run while the CPU sampler sleeps.
        let registry = Arc::clone(&self.registry);
        let services = thread::spawn(move || registry.statuses());

        let system = self.sample_system();

        let services = services.join().unwrap_or_else(|_| {
            debug!("Service status sampling panicked");
            Vec::new()
        });

        MetricsSnapshot {
            timestamp: Utc::now(),
            system,
            services,
            daemon: self.connections.as_ref().map(|c| DaemonMetrics {
                version: VERSION,
                uptime_seconds: self.started.elapsed().as_secs(),
                requests_total: c.total_requests(),
                requests_failed: c.failed_requests(),
                active_connections: c.active(),
            }),
        }
    }

    fn sample_system(&self) -> SystemMetrics {
        let cpu_percent = system::read_cpu_times().and_then(|before| {
            thread::sleep(self.cpu_sample_interval);
            let after = system::read_cpu_times()?;
            system::cpu_usage_percent(&before, &after)
        });

        let disks = self
            .storage_paths
            .iter()
            .filter_map(|path| match system::disk_usage(path) {
                Ok(usage) => Some(usage),
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "Disk sampling failed");
                    None
                }
            })
            .collect();

        let network = system::read_network().map(|interfaces| {
            interfaces
                .into_iter()
                .filter(|i| i.name != "lo")
                .collect()
        });

        SystemMetrics {
            cpu_percent,
            load: system::read_loadavg(),
            memory: system::read_memory(),
            disks,
            network,
            uptime_seconds: system::read_uptime(),
        }
    }
}
