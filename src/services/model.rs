//! Typed service and share records.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{DaemonError, DaemonResult, ValidationErrorKind};
use crate::validation::{
    validate_access_user, validate_client_network, validate_share_name, validate_share_path,
};

/// A managed file-sharing protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceType {
    Smb,
    Nfs,
    Ftp,
}

impl ServiceType {
    pub const ALL: [ServiceType; 3] = [ServiceType::Smb, ServiceType::Nfs, ServiceType::Ftp];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Smb => "smb",
            ServiceType::Nfs => "nfs",
            ServiceType::Ftp => "ftp",
        }
    }

    /// Systemd unit on Debian-family systems.
    pub fn default_unit(self) -> &'static str {
        match self {
            ServiceType::Smb => "smbd",
            ServiceType::Nfs => "nfs-server",
            ServiceType::Ftp => "vsftpd",
        }
    }

    pub fn default_config_path(self) -> &'static str {
        match self {
            ServiceType::Smb => "/etc/samba/smb.conf",
            ServiceType::Nfs => "/etc/exports",
            ServiceType::Ftp => "/etc/vsftpd.conf",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smb" | "samba" | "cifs" => Ok(ServiceType::Smb),
            "nfs" => Ok(ServiceType::Nfs),
            "ftp" | "vsftpd" => Ok(ServiceType::Ftp),
            _ => Err(DaemonError::Validation {
                kind: ValidationErrorKind::UnknownService {
                    service: s.to_string(),
                },
            }),
        }
    }
}

/// Operator-managed record describing one protocol service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDefinition {
    pub name: String,
    pub service_type: ServiceType,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Start the service when a config is applied while it is stopped.
    #[serde(default)]
    pub auto_start: bool,
    pub configuration: ServiceConfig,
}

/// Protocol-specific settings, one variant per service type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServiceConfig {
    Smb(SmbConfig),
    Nfs(NfsConfig),
    Ftp(FtpConfig),
}

impl ServiceConfig {
    pub fn service_type(&self) -> ServiceType {
        match self {
            ServiceConfig::Smb(_) => ServiceType::Smb,
            ServiceConfig::Nfs(_) => ServiceType::Nfs,
            ServiceConfig::Ftp(_) => ServiceType::Ftp,
        }
    }
}

/// `[global]` settings of smb.conf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmbConfig {
    #[serde(default = "default_workgroup")]
    pub workgroup: String,
    #[serde(default = "default_server_string")]
    pub server_string: String,
    #[serde(default)]
    pub netbios_name: Option<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub bind_interfaces_only: bool,
    #[serde(default = "default_map_to_guest")]
    pub map_to_guest: String,
    #[serde(default)]
    pub min_protocol: Option<String>,
    #[serde(default = "default_smb_log_level")]
    pub log_level: u8,
}

/// Defaults applied to every NFS export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NfsConfig {
    #[serde(default = "default_nfs_options")]
    pub default_options: Vec<String>,
    #[serde(default = "default_true")]
    pub root_squash: bool,
    /// Clients used for shares that list no networks of their own.
    #[serde(default)]
    pub default_clients: Vec<String>,
}

/// vsftpd daemon settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FtpConfig {
    #[serde(default = "default_ftp_port")]
    pub listen_port: u16,
    #[serde(default)]
    pub listen_address: Option<String>,
    #[serde(default = "default_true")]
    pub local_enable: bool,
    #[serde(default = "default_true")]
    pub chroot_local_user: bool,
    #[serde(default)]
    pub pasv_min_port: Option<u16>,
    #[serde(default)]
    pub pasv_max_port: Option<u16>,
    #[serde(default = "default_max_clients")]
    pub max_clients: u32,
    #[serde(default)]
    pub banner: Option<String>,
    #[serde(default)]
    pub ssl_enable: bool,
    #[serde(default)]
    pub rsa_cert_file: Option<String>,
}

/// One exported resource: SMB share, NFS export or FTP root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareRecord {
    pub name: String,
    pub path: String,
    pub protocol: ServiceType,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub guest_allowed: bool,
    #[serde(default)]
    pub valid_users: Vec<String>,
    #[serde(default)]
    pub allowed_networks: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub comment: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_workgroup() -> String {
    "WORKGROUP".to_string()
}

fn default_server_string() -> String {
    "NAS".to_string()
}

fn default_map_to_guest() -> String {
    "Bad User".to_string()
}

fn default_smb_log_level() -> u8 {
    1
}

fn default_nfs_options() -> Vec<String> {
    vec!["sync".to_string(), "no_subtree_check".to_string()]
}

fn default_ftp_port() -> u16 {
    21
}

fn default_max_clients() -> u32 {
    50
}

impl Default for SmbConfig {
    fn default() -> Self {
        Self {
            workgroup: default_workgroup(),
            server_string: default_server_string(),
            netbios_name: None,
            interfaces: Vec::new(),
            bind_interfaces_only: false,
            map_to_guest: default_map_to_guest(),
            min_protocol: None,
            log_level: default_smb_log_level(),
        }
    }
}

impl Default for NfsConfig {
    fn default() -> Self {
        Self {
            default_options: default_nfs_options(),
            root_squash: true,
            default_clients: Vec::new(),
        }
    }
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            listen_port: default_ftp_port(),
            listen_address: None,
            local_enable: true,
            chroot_local_user: true,
            pasv_min_port: None,
            pasv_max_port: None,
            max_clients: default_max_clients(),
            banner: None,
            ssl_enable: false,
            rsa_cert_file: None,
        }
    }
}

impl ServiceDefinition {
    /// Build an enabled definition named after its service type.
    pub fn new(configuration: ServiceConfig) -> Self {
        let service_type = configuration.service_type();
        Self {
            name: service_type.as_str().to_string(),
            service_type,
            enabled: true,
            auto_start: false,
            configuration,
        }
    }

    /// Check the record's internal consistency.
    pub fn validate(&self) -> DaemonResult<()> {
        if self.name.trim().is_empty() {
            return Err(DaemonError::invalid("name", "Service name cannot be empty"));
        }

        if self.configuration.service_type() != self.service_type {
            return Err(DaemonError::invalid(
                "configuration",
                format!(
                    "{} configuration supplied for a {} service",
                    self.configuration.service_type(),
                    self.service_type
                ),
            ));
        }

        match &self.configuration {
            ServiceConfig::Smb(config) => config.validate(),
            ServiceConfig::Nfs(config) => config.validate(),
            ServiceConfig::Ftp(config) => config.validate(),
        }
    }
}

impl SmbConfig {
    fn validate(&self) -> DaemonResult<()> {
        if self.workgroup.trim().is_empty() {
            return Err(DaemonError::invalid("workgroup", "Workgroup cannot be empty"));
        }
        if let Some(name) = &self.netbios_name {
            if name.len() > 15 {
                return Err(DaemonError::invalid(
                    "netbios_name",
                    "NetBIOS names are limited to 15 characters",
                ));
            }
        }
        if self.log_level > 10 {
            return Err(DaemonError::invalid("log_level", "Samba log level must be 0-10"));
        }
        Ok(())
    }
}

impl NfsConfig {
    fn validate(&self) -> DaemonResult<()> {
        for option in &self.default_options {
            let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | ':' | '/' | '.');
            if option.is_empty() || !option.chars().all(allowed) {
                return Err(DaemonError::invalid(
                    "default_options",
                    format!("Invalid export option '{}'", option),
                ));
            }
        }
        for client in &self.default_clients {
            validate_client_network(client)?;
        }
        Ok(())
    }
}

impl FtpConfig {
    fn validate(&self) -> DaemonResult<()> {
        if self.listen_port == 0 {
            return Err(DaemonError::invalid("listen_port", "Port cannot be 0"));
        }
        match (self.pasv_min_port, self.pasv_max_port) {
            (Some(min), Some(max)) if min > max => {
                return Err(DaemonError::invalid(
                    "pasv_min_port",
                    "Passive port range is inverted",
                ));
            }
            (Some(_), None) | (None, Some(_)) => {
                return Err(DaemonError::invalid(
                    "pasv_max_port",
                    "Passive port range needs both bounds",
                ));
            }
            _ => {}
        }
        if self.ssl_enable && self.rsa_cert_file.is_none() {
            return Err(DaemonError::invalid(
                "rsa_cert_file",
                "ssl_enable requires a certificate file",
            ));
        }
        if self.max_clients == 0 {
            return Err(DaemonError::invalid("max_clients", "max_clients cannot be 0"));
        }
        Ok(())
    }
}

impl ShareRecord {
    pub fn new(name: impl Into<String>, path: impl Into<String>, protocol: ServiceType) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            protocol,
            read_only: false,
            guest_allowed: false,
            valid_users: Vec::new(),
            allowed_networks: Vec::new(),
            enabled: true,
            comment: None,
        }
    }

    /// Check field-level rules.
    pub fn validate(&self) -> DaemonResult<()> {
        validate_share_name(&self.name)?;
        validate_share_path(&self.path)?;
        for user in &self.valid_users {
            validate_access_user(user)?;
        }
        for network in &self.allowed_networks {
            validate_client_network(network)?;
        }
        Ok(())
    }
}

/// Validate `shares` against `definition` and return the enabled ones in
/// name order.
///
/// Every share must carry the definition's protocol, and the definition
/// itself must be enabled.
pub fn select_shares<'a>(
    definition: &ServiceDefinition,
    shares: &'a [ShareRecord],
) -> DaemonResult<Vec<&'a ShareRecord>> {
    definition.validate()?;

    if !definition.enabled {
        return Err(DaemonError::Validation {
            kind: ValidationErrorKind::ServiceDisabled {
                service: definition.name.clone(),
            },
        });
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::with_capacity(shares.len());

    for share in shares {
        if share.protocol != definition.service_type {
            return Err(DaemonError::Validation {
                kind: ValidationErrorKind::ProtocolMismatch {
                    share: share.name.clone(),
                    protocol: share.protocol.to_string(),
                    expected: definition.service_type.to_string(),
                },
            });
        }
        share.validate()?;
        if !seen.insert(share.name.to_lowercase()) {
            return Err(DaemonError::Validation {
                kind: ValidationErrorKind::DuplicateShare {
                    share: share.name.clone(),
                },
            });
        }
        if share.enabled {
            selected.push(share);
        }
    }

    selected.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(selected)
}

/// Lifecycle state of a managed service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    Stopped,
    Starting,
    Running,
    Stopping,
    Failed,
    Unknown,
}

impl ServiceState {
    pub fn as_str(self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Failed => "failed",
            ServiceState::Unknown => "unknown",
        }
    }

    /// Whether `action` is a legal transition out of this state.
    ///
    /// A failed service only leaves `failed` through an explicit start.
    /// Reloading needs a live process.
    pub fn permits(self, action: ControlAction) -> bool {
        match (self, action) {
            (ServiceState::Failed, ControlAction::Start) => true,
            (ServiceState::Failed, _) => false,
            (ServiceState::Stopped, ControlAction::Reload) => false,
            _ => true,
        }
    }

    /// Running or on its way there.
    pub fn is_active(self) -> bool {
        matches!(self, ServiceState::Running | ServiceState::Starting)
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Process-control verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlAction {
    Start,
    Stop,
    Restart,
    Reload,
}

impl ControlAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ControlAction::Start => "start",
            ControlAction::Stop => "stop",
            ControlAction::Restart => "restart",
            ControlAction::Reload => "reload",
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time observation of a managed service. Never cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub service: ServiceType,
    pub unit: String,
    pub state: ServiceState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime_seconds: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_bytes: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_seconds: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<u64>,
    pub observed_at: DateTime<Utc>,
}

impl ServiceStatus {
    /// A status carrying no observation beyond `state`.
    pub fn bare(service: ServiceType, unit: &str, state: ServiceState) -> Self {
        Self {
            service,
            unit: unit.to_string(),
            state,
            pid: None,
            uptime_seconds: None,
            memory_bytes: None,
            cpu_seconds: None,
            tasks: None,
            observed_at: Utc::now(),
        }
    }
}
