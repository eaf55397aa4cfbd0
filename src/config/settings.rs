//! Configuration settings for the NAS service daemon.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::DaemonError;
use crate::protocol::DEFAULT_MAX_MESSAGE_SIZE;
use crate::services::ServiceType;

/// Main configuration structure for the daemon.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub socket: SocketConfig,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub services: ServicesConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Socket configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SocketConfig {
    /// Path to the Unix socket file.
    pub path: PathBuf,
    /// Socket file permissions (e.g., "0660").
    #[serde(default = "default_socket_permissions")]
    pub permissions: String,
}

/// Security configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityConfig {
    /// Peer UIDs allowed to connect. Empty rejects everyone.
    #[serde(default)]
    pub allowed_peer_uids: Vec<u32>,
}

/// Paths configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    /// Directory with template overrides (same names as the built-ins).
    #[serde(default = "default_templates_dir")]
    pub templates_dir: PathBuf,
    /// Directory receiving timestamped config backups.
    #[serde(default = "default_backup_dir")]
    pub backup_dir: PathBuf,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Log format ("pretty" or "json").
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Limits configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Maximum concurrent connections.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    /// Socket read/write timeout in seconds.
    #[serde(default = "default_socket_timeout")]
    pub socket_timeout_seconds: u64,
    /// Bound on start/stop/restart/reload and config check commands.
    #[serde(default = "default_control_timeout")]
    pub control_timeout_seconds: u64,
    /// Bound on a single status query.
    #[serde(default = "default_status_timeout_ms")]
    pub status_timeout_ms: u64,
}

/// Per-protocol service settings.
#[derive(Debug, Clone, Deserialize)]
pub struct ServicesConfig {
    #[serde(default = "default_smb_service")]
    pub smb: ServiceSettings,
    #[serde(default = "default_nfs_service")]
    pub nfs: ServiceSettings,
    #[serde(default = "default_ftp_service")]
    pub ftp: ServiceSettings,
}

/// Settings for one managed service type.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceSettings {
    /// Whether the daemon manages this service at all.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Systemd unit controlled for this service.
    pub unit: String,
    /// Config file the rendered template is written to.
    pub config_path: PathBuf,
}

/// Health checker configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthConfig {
    /// Upper bound for each detailed sub-check.
    #[serde(default = "default_check_timeout_ms")]
    pub check_timeout_ms: u64,
    /// A successful sub-check slower than this is reported degraded.
    #[serde(default = "default_slow_threshold_ms")]
    pub slow_threshold_ms: u64,
    /// Mount points summarised by the storage check.
    #[serde(default = "default_storage_paths")]
    pub storage_paths: Vec<PathBuf>,
    /// Disk usage percentage reported as degraded.
    #[serde(default = "default_disk_warning")]
    pub disk_warning_percent: f64,
    /// Disk usage percentage reported as unhealthy.
    #[serde(default = "default_disk_critical")]
    pub disk_critical_percent: f64,
}

/// How the data store is probed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseKind {
    /// TCP connect to a database server.
    Tcp,
    /// SQLite database file must exist and be readable.
    Sqlite,
    /// No data store; probe always succeeds.
    None,
}

/// Data store probe configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_kind")]
    pub kind: DatabaseKind,
    /// `host:port` for the tcp probe.
    pub address: Option<String>,
    /// Database file for the sqlite probe.
    pub path: Option<PathBuf>,
}

/// Metrics collector configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    /// Interval between the two /proc/stat samples used for CPU usage.
    #[serde(default = "default_cpu_sample_ms")]
    pub cpu_sample_interval_ms: u64,
    /// Prefix of every exposition metric name.
    #[serde(default = "default_metrics_prefix")]
    pub prefix: String,
}

// Default value functions
fn default_socket_permissions() -> String {
    "0660".to_string()
}

fn default_templates_dir() -> PathBuf {
    PathBuf::from("/etc/nas-daemon/templates")
}

fn default_backup_dir() -> PathBuf {
    PathBuf::from("/var/lib/nas-daemon/backups")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_max_message_size() -> usize {
    DEFAULT_MAX_MESSAGE_SIZE
}

fn default_max_concurrent() -> usize {
    32
}

fn default_socket_timeout() -> u64 {
    30
}

fn default_control_timeout() -> u64 {
    5
}

fn default_status_timeout_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

fn default_smb_service() -> ServiceSettings {
    ServiceSettings {
        enabled: true,
        unit: ServiceType::Smb.default_unit().to_string(),
        config_path: PathBuf::from(ServiceType::Smb.default_config_path()),
    }
}

fn default_nfs_service() -> ServiceSettings {
    ServiceSettings {
        enabled: true,
        unit: ServiceType::Nfs.default_unit().to_string(),
        config_path: PathBuf::from(ServiceType::Nfs.default_config_path()),
    }
}

fn default_ftp_service() -> ServiceSettings {
    ServiceSettings {
        enabled: true,
        unit: ServiceType::Ftp.default_unit().to_string(),
        config_path: PathBuf::from(ServiceType::Ftp.default_config_path()),
    }
}

fn default_check_timeout_ms() -> u64 {
    3000
}

fn default_slow_threshold_ms() -> u64 {
    1000
}

fn default_storage_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("/")]
}

fn default_disk_warning() -> f64 {
    85.0
}

fn default_disk_critical() -> f64 {
    95.0
}

fn default_database_kind() -> DatabaseKind {
    DatabaseKind::None
}

fn default_cpu_sample_ms() -> u64 {
    200
}

fn default_metrics_prefix() -> String {
    "nas".to_string()
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            templates_dir: default_templates_dir(),
            backup_dir: default_backup_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_message_size: default_max_message_size(),
            max_concurrent_requests: default_max_concurrent(),
            socket_timeout_seconds: default_socket_timeout(),
            control_timeout_seconds: default_control_timeout(),
            status_timeout_ms: default_status_timeout_ms(),
        }
    }
}

impl Default for ServicesConfig {
    fn default() -> Self {
        Self {
            smb: default_smb_service(),
            nfs: default_nfs_service(),
            ftp: default_ftp_service(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            check_timeout_ms: default_check_timeout_ms(),
            slow_threshold_ms: default_slow_threshold_ms(),
            storage_paths: default_storage_paths(),
            disk_warning_percent: default_disk_warning(),
            disk_critical_percent: default_disk_critical(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            kind: default_database_kind(),
            address: None,
            path: None,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            cpu_sample_interval_ms: default_cpu_sample_ms(),
            prefix: default_metrics_prefix(),
        }
    }
}

impl LimitsConfig {
    pub fn control_timeout(&self) -> Duration {
        Duration::from_secs(self.control_timeout_seconds)
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }
}

impl ServicesConfig {
    /// Settings for one service type.
    pub fn get(&self, service_type: ServiceType) -> &ServiceSettings {
        match service_type {
            ServiceType::Smb => &self.smb,
            ServiceType::Nfs => &self.nfs,
            ServiceType::Ftp => &self.ftp,
        }
    }
}

impl Settings {
    /// Settings with every section at its default, bound to `socket_path`.
    pub fn with_socket(socket_path: PathBuf) -> Self {
        Self {
            socket: SocketConfig {
                path: socket_path,
                permissions: default_socket_permissions(),
            },
            security: SecurityConfig::default(),
            paths: PathsConfig::default(),
            logging: LoggingConfig::default(),
            limits: LimitsConfig::default(),
            services: ServicesConfig::default(),
            health: HealthConfig::default(),
            database: DatabaseConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Load settings from a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, DaemonError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| DaemonError::Config {
            message: format!("Failed to read config file '{}': {}", path.display(), e),
        })?;

        Self::from_toml(&content).map_err(|e| DaemonError::Config {
            message: format!("Invalid config file '{}': {}", path.display(), e),
        })
    }

    /// Parse and validate settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, DaemonError> {
        let settings: Settings = toml::from_str(content).map_err(|e| DaemonError::Config {
            message: format!("Failed to parse TOML: {}", e),
        })?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate the settings.
    fn validate(&self) -> Result<(), DaemonError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(DaemonError::Config {
                message: format!(
                    "Invalid log level '{}'. Valid levels: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["pretty", "json"];
        if !valid_formats.contains(&self.logging.format.to_lowercase().as_str()) {
            return Err(DaemonError::Config {
                message: format!(
                    "Invalid log format '{}'. Valid formats: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        if u32::from_str_radix(&self.socket.permissions, 8).is_err() {
            return Err(DaemonError::Config {
                message: format!(
                    "Invalid socket permissions '{}'. Must be octal (e.g., '0660')",
                    self.socket.permissions
                ),
            });
        }

        if self.limits.control_timeout_seconds == 0 || self.limits.status_timeout_ms == 0 {
            return Err(DaemonError::Config {
                message: "Control and status timeouts must be non-zero".to_string(),
            });
        }

        if self.health.check_timeout_ms <= self.limits.status_timeout_ms {
            return Err(DaemonError::Config {
                message: format!(
                    "health.check_timeout_ms ({}) must exceed limits.status_timeout_ms ({})",
                    self.health.check_timeout_ms, self.limits.status_timeout_ms
                ),
            });
        }

        if self.health.disk_warning_percent > self.health.disk_critical_percent {
            return Err(DaemonError::Config {
                message: format!(
                    "disk_warning_percent ({}) exceeds disk_critical_percent ({})",
                    self.health.disk_warning_percent, self.health.disk_critical_percent
                ),
            });
        }

        match self.database.kind {
            DatabaseKind::Tcp if self.database.address.is_none() => {
                return Err(DaemonError::Config {
                    message: "database.address is required for the tcp probe".to_string(),
                });
            }
            DatabaseKind::Sqlite if self.database.path.is_none() => {
                return Err(DaemonError::Config {
                    message: "database.path is required for the sqlite probe".to_string(),
                });
            }
            _ => {}
        }

        for service_type in ServiceType::ALL {
            let service = self.services.get(service_type);
            if !service.config_path.is_absolute() {
                return Err(DaemonError::Config {
                    message: format!(
                        "services.{}.config_path must be absolute",
                        service_type.as_str()
                    ),
                });
            }
        }

        Ok(())
    }
}
