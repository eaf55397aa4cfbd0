//! Error types for the NAS service daemon.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the daemon.
#[derive(Error, Debug)]
pub enum DaemonError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Socket-related errors.
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Authentication errors.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// Validation errors.
    #[error("Validation error: {kind}")]
    Validation { kind: ValidationErrorKind },

    /// Control surface command errors.
    #[error("Command error: {kind}")]
    Command { kind: CommandErrorKind },

    /// Template lookup and rendering errors.
    #[error("Template error: {kind}")]
    Template { kind: TemplateErrorKind },

    /// Config file backup, write and restore errors.
    #[error("Config store error: {kind}")]
    Store { kind: StoreErrorKind },

    /// Process control errors (start/stop/restart/reload/check).
    #[error("Service control error: {kind}")]
    Control { kind: ControlErrorKind },

    /// Another apply for the same service is in flight.
    #[error("Concurrent modification: an apply for '{service}' is already in progress")]
    ConcurrentModification { service: String },

    /// A rejected config could not be rolled back.
    #[error("Rollback failed for '{service}': {restore_error} (original failure: {cause})")]
    RollbackFailed {
        service: String,
        cause: String,
        restore_error: String,
    },

    /// Protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Authentication error kinds.
#[derive(Error, Debug)]
pub enum AuthErrorKind {
    #[error("Unauthorized peer: UID {uid} not in allowed list")]
    UnauthorizedPeer { uid: u32 },
}

/// Validation error kinds.
#[derive(Error, Debug)]
pub enum ValidationErrorKind {
    #[error("Path must be absolute: {path}")]
    RelativePath { path: PathBuf },

    #[error("Path traversal detected in: {path}")]
    PathTraversal { path: PathBuf },

    #[error("Service not recognized: {service}")]
    UnknownService { service: String },

    #[error("Service '{service}' is disabled")]
    ServiceDisabled { service: String },

    #[error("Share '{share}' uses protocol {protocol}, expected {expected}")]
    ProtocolMismatch {
        share: String,
        protocol: String,
        expected: String,
    },

    #[error("Duplicate share name: {share}")]
    DuplicateShare { share: String },

    #[error("Missing required parameter: {param}")]
    MissingParameter { param: String },

    #[error("Invalid parameter value for '{param}': {message}")]
    InvalidParameter { param: String, message: String },
}

/// Command error kinds.
#[derive(Error, Debug)]
pub enum CommandErrorKind {
    #[error("Unknown command: {name}")]
    UnknownCommand { name: String },
}

/// Template error kinds.
#[derive(Error, Debug)]
pub enum TemplateErrorKind {
    #[error("Template not found: {name}")]
    NotFound { name: String },

    #[error("Failed to render '{template}': {message}")]
    Render { template: String, message: String },

    #[error("Failed to load templates: {message}")]
    Load { message: String },
}

/// Config store error kinds.
#[derive(Error, Debug)]
pub enum StoreErrorKind {
    #[error("Failed to back up {}: {message}", path.display())]
    Backup { path: PathBuf, message: String },

    #[error("Failed to write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },

    #[error("Failed to restore {}: {message}", path.display())]
    Restore { path: PathBuf, message: String },
}

/// Process control error kinds.
#[derive(Error, Debug)]
pub enum ControlErrorKind {
    #[error("{action} {unit} failed (exit code {exit_code:?}): {stderr}")]
    Failed {
        unit: String,
        action: String,
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("{action} {unit} timed out after {timeout_secs} seconds")]
    Timeout {
        unit: String,
        action: String,
        timeout_secs: u64,
    },

    #[error("Failed to spawn {program}: {message}")]
    Spawn { program: String, message: String },

    #[error("State of {unit} is unknown, refusing to change its config")]
    StateUnknown { unit: String },

    #[error("Cannot {action} '{service}' while it is {state}")]
    InvalidTransition {
        service: String,
        state: String,
        action: String,
    },
}

/// Protocol error kinds.
#[derive(Error, Debug)]
pub enum ProtocolErrorKind {
    #[error("Message too large: {size} bytes exceeds maximum of {max} bytes")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Invalid message format: {message}")]
    InvalidMessageFormat { message: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,
}

impl DaemonError {
    /// Stable machine-readable code for the control surface.
    pub fn code(&self) -> &'static str {
        match self {
            DaemonError::Config { .. } => "CONFIG_ERROR",
            DaemonError::Socket { .. } => "SOCKET_ERROR",
            DaemonError::Auth { .. } => "AUTH_ERROR",
            DaemonError::Validation { .. } => "VALIDATION_ERROR",
            DaemonError::Command { .. } => "UNKNOWN_COMMAND",
            DaemonError::Template {
                kind: TemplateErrorKind::NotFound { .. },
            } => "TEMPLATE_NOT_FOUND",
            DaemonError::Template { .. } => "RENDER_ERROR",
            DaemonError::Store {
                kind: StoreErrorKind::Backup { .. },
            } => "BACKUP_ERROR",
            DaemonError::Store {
                kind: StoreErrorKind::Write { .. },
            } => "WRITE_ERROR",
            DaemonError::Store {
                kind: StoreErrorKind::Restore { .. },
            } => "RESTORE_ERROR",
            DaemonError::Control { .. } => "SERVICE_CONTROL_ERROR",
            DaemonError::ConcurrentModification { .. } => "CONCURRENT_MODIFICATION",
            DaemonError::RollbackFailed { .. } => "ROLLBACK_FAILED",
            DaemonError::Protocol { .. } => "PROTOCOL_ERROR",
            DaemonError::Io(_) => "IO_ERROR",
            DaemonError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }

    /// Structured context (paths, exit codes, stderr) for callers that
    /// render their own messages.
    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            DaemonError::Template {
                kind: TemplateErrorKind::Render { template, .. },
            } => Some(serde_json::json!({ "template": template })),
            DaemonError::Template {
                kind: TemplateErrorKind::NotFound { name },
            } => Some(serde_json::json!({ "template": name })),
            DaemonError::Store { kind } => {
                let path = match kind {
                    StoreErrorKind::Backup { path, .. }
                    | StoreErrorKind::Write { path, .. }
                    | StoreErrorKind::Restore { path, .. } => path,
                };
                Some(serde_json::json!({ "path": path.to_string_lossy() }))
            }
            DaemonError::Control {
                kind:
                    ControlErrorKind::Failed {
                        unit,
                        action,
                        exit_code,
                        stderr,
                    },
            } => Some(serde_json::json!({
                "unit": unit,
                "action": action,
                "exit_code": exit_code,
                "stderr": stderr,
            })),
            DaemonError::Control {
                kind:
                    ControlErrorKind::Timeout {
                        unit,
                        action,
                        timeout_secs,
                    },
            } => Some(serde_json::json!({
                "unit": unit,
                "action": action,
                "timeout_secs": timeout_secs,
            })),
            DaemonError::Control {
                kind: ControlErrorKind::StateUnknown { unit },
            } => Some(serde_json::json!({ "unit": unit })),
            DaemonError::ConcurrentModification { service } => {
                Some(serde_json::json!({ "service": service }))
            }
            DaemonError::RollbackFailed {
                service,
                cause,
                restore_error,
            } => Some(serde_json::json!({
                "service": service,
                "cause": cause,
                "restore_error": restore_error,
            })),
            _ => None,
        }
    }

    /// Shorthand for an invalid parameter error.
    pub fn invalid(param: impl Into<String>, message: impl Into<String>) -> Self {
        DaemonError::Validation {
            kind: ValidationErrorKind::InvalidParameter {
                param: param.into(),
                message: message.into(),
            },
        }
    }
}

/// Result type alias for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = DaemonError::Template {
            kind: TemplateErrorKind::NotFound {
                name: "x.tera".to_string(),
            },
        };
        assert_eq!(err.code(), "TEMPLATE_NOT_FOUND");

        let err = DaemonError::Store {
            kind: StoreErrorKind::Backup {
                path: PathBuf::from("/etc/samba/smb.conf"),
                message: "denied".to_string(),
            },
        };
        assert_eq!(err.code(), "BACKUP_ERROR");
        assert_eq!(err.details().unwrap()["path"], "/etc/samba/smb.conf");
    }

    #[test]
    fn test_control_failure_details() {
        let err = DaemonError::Control {
            kind: ControlErrorKind::Failed {
                unit: "smbd".to_string(),
                action: "reload".to_string(),
                exit_code: Some(1),
                stderr: "Job failed".to_string(),
            },
        };
        let details = err.details().unwrap();
        assert_eq!(details["exit_code"], 1);
        assert_eq!(details["stderr"], "Job failed");
        assert!(err.to_string().contains("reload smbd failed"));
    }
}
