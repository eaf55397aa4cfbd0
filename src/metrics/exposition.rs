//! Text exposition format for pull-based scrapers.

use std::fmt::Write as _;

use crate::services::{ServiceState, ServiceStatus};

use super::collector::MetricsSnapshot;
use super::system::{DiskUsage, NetInterface};

static SERVICE_STATES: [ServiceState; 6] = [
    ServiceState::Stopped,
    ServiceState::Starting,
    ServiceState::Running,
    ServiceState::Stopping,
    ServiceState::Failed,
    ServiceState::Unknown,
];

/// Accumulates metric families; families with no samples are skipped.
struct Exposition<'a> {
    prefix: &'a str,
    out: String,
}

impl<'a> Exposition<'a> {
    fn new(prefix: &'a str) -> Self {
        Self {
            prefix,
            out: String::new(),
        }
    }

    fn family(&mut self, name: &str, kind: &str, help: &str, samples: &[(Vec<(&str, &str)>, f64)]) {
        if samples.is_empty() {
            return;
        }
        let _ = writeln!(self.out, "# HELP {}_{} {}", self.prefix, name, help);
        let _ = writeln!(self.out, "# TYPE {}_{} {}", self.prefix, name, kind);
        for (labels, value) in samples {
            let _ = writeln!(
                self.out,
                "{}_{}{} {}",
                self.prefix,
                name,
                format_labels(labels),
                value
            );
        }
    }

    fn single(&mut self, name: &str, kind: &str, help: &str, value: Option<f64>) {
        if let Some(value) = value {
            self.family(name, kind, help, &[(Vec::new(), value)]);
        }
    }
}

fn format_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let pairs: Vec<String> = labels
        .iter()
        .map(|(k, v)| format!("{}=\"{}\"", k, escape_label(v)))
        .collect();
    format!("{{{}}}", pairs.join(","))
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Render `snapshot` as `name{labels} value` lines.
pub fn render_exposition(snapshot: &MetricsSnapshot, prefix: &str) -> String {
    let mut exp = Exposition::new(prefix);
    let system = &snapshot.system;

    exp.single(
        "cpu_usage_percent",
        "gauge",
        "CPU busy time over the sampling interval.",
        system.cpu_percent,
    );

    if let Some(load) = &system.load {
        exp.family(
            "load_average",
            "gauge",
            "System load average.",
            &[
                (vec![("window", "1m")], load.one),
                (vec![("window", "5m")], load.five),
                (vec![("window", "15m")], load.fifteen),
            ],
        );
    }

    if let Some(memory) = &system.memory {
        exp.single("memory_total_bytes", "gauge", "Physical memory.", Some(memory.total_bytes as f64));
        exp.single(
            "memory_available_bytes",
            "gauge",
            "Memory available without swapping.",
            Some(memory.available_bytes as f64),
        );
        exp.single("swap_total_bytes", "gauge", "Swap space.", memory.swap_total_bytes.map(|v| v as f64));
        exp.single("swap_free_bytes", "gauge", "Unused swap space.", memory.swap_free_bytes.map(|v| v as f64));
    }

    let disk_paths: Vec<String> = system
        .disks
        .iter()
        .map(|d| d.path.to_string_lossy().into_owned())
        .collect();
    let disk_samples = |value: fn(&DiskUsage) -> u64| {
        system
            .disks
            .iter()
            .zip(&disk_paths)
            .map(|(disk, path)| (vec![("path", path.as_str())], value(disk) as f64))
            .collect::<Vec<_>>()
    };
    exp.family("disk_total_bytes", "gauge", "Filesystem size.", &disk_samples(|d| d.total_bytes));
    exp.family("disk_used_bytes", "gauge", "Filesystem space in use.", &disk_samples(|d| d.used_bytes));
    exp.family(
        "disk_available_bytes",
        "gauge",
        "Filesystem space available to unprivileged users.",
        &disk_samples(|d| d.available_bytes),
    );

    if let Some(interfaces) = &system.network {
        let samples = |value: fn(&NetInterface) -> u64| {
            interfaces
                .iter()
                .map(|i| (vec![("interface", i.name.as_str())], value(i) as f64))
                .collect::<Vec<_>>()
        };
        exp.family("network_receive_bytes_total", "counter", "Bytes received.", &samples(|i| i.rx_bytes));
        exp.family("network_transmit_bytes_total", "counter", "Bytes transmitted.", &samples(|i| i.tx_bytes));
        exp.family("network_receive_errors_total", "counter", "Receive errors.", &samples(|i| i.rx_errors));
        exp.family("network_transmit_errors_total", "counter", "Transmit errors.", &samples(|i| i.tx_errors));
    }

    exp.single("system_uptime_seconds", "gauge", "Seconds since boot.", system.uptime_seconds);

    let services = &snapshot.services;
    let up: Vec<_> = services
        .iter()
        .filter(|s| s.state != ServiceState::Unknown)
        .map(|s| {
            let value = if s.state == ServiceState::Running { 1.0 } else { 0.0 };
            (vec![("service", s.service.as_str()), ("unit", s.unit.as_str())], value)
        })
        .collect();
    exp.family("service_up", "gauge", "Whether the service is running.", &up);

    let states: Vec<_> = services
        .iter()
        .flat_map(|s| {
            SERVICE_STATES.iter().map(move |state| {
                let value = if s.state == *state { 1.0 } else { 0.0 };
                (vec![("service", s.service.as_str()), ("state", state.as_str())], value)
            })
        })
        .collect();
    exp.family("service_state", "gauge", "Current lifecycle state of the service.", &states);

    let per_service = |value: fn(&ServiceStatus) -> Option<f64>| {
        services
            .iter()
            .filter_map(|s| Some((vec![("service", s.service.as_str())], value(s)?)))
            .collect::<Vec<_>>()
    };
    exp.family(
        "service_memory_bytes",
        "gauge",
        "Memory charged to the service.",
        &per_service(|s| s.memory_bytes.map(|v| v as f64)),
    );
    exp.family(
        "service_cpu_seconds_total",
        "counter",
        "CPU time consumed by the service.",
        &per_service(|s| s.cpu_seconds),
    );
    exp.family(
        "service_tasks",
        "gauge",
        "Tasks in the service's cgroup.",
        &per_service(|s| s.tasks.map(|v| v as f64)),
    );
    exp.family(
        "service_uptime_seconds",
        "gauge",
        "Seconds since the service entered the running state.",
        &per_service(|s| s.uptime_seconds.map(|v| v as f64)),
    );

    if let Some(daemon) = &snapshot.daemon {
        exp.single(
            "daemon_requests_total",
            "counter",
            "Control requests handled.",
            Some(daemon.requests_total as f64),
        );
        exp.single(
            "daemon_requests_failed_total",
            "counter",
            "Control requests that returned an error.",
            Some(daemon.requests_failed as f64),
        );
        exp.single(
            "daemon_active_connections",
            "gauge",
            "Open control connections.",
            Some(daemon.active_connections as f64),
        );
        exp.single(
            "daemon_uptime_seconds",
            "gauge",
            "Seconds since the daemon started.",
            Some(daemon.uptime_seconds as f64),
        );
    }

    exp.out
}
