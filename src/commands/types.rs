//! Request parameters, command results and the per-request context.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::PeerInfo;
use crate::error::{DaemonError, ValidationErrorKind};
use crate::services::ServiceType;

fn missing(key: &str) -> DaemonError {
    DaemonError::Validation {
        kind: ValidationErrorKind::MissingParameter {
            param: key.to_string(),
        },
    }
}

/// The `params` object of a request, with typed accessors that fail as
/// `VALIDATION_ERROR`.
#[derive(Debug, Clone)]
pub struct CommandParams {
    inner: serde_json::Value,
}

impl CommandParams {
    pub fn new(value: serde_json::Value) -> Self {
        Self { inner: value }
    }

    /// Get a required string parameter.
    pub fn get_string(&self, key: &str) -> Result<String, DaemonError> {
        self.inner
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| missing(key))
    }

    pub fn get_optional_string(&self, key: &str) -> Option<String> {
        self.inner.get(key).and_then(|v| v.as_str()).map(|s| s.to_string())
    }

    /// Get a required non-negative integer parameter.
    pub fn get_u64(&self, key: &str) -> Result<u64, DaemonError> {
        let value = self.inner.get(key).ok_or_else(|| missing(key))?;
        value
            .as_u64()
            .ok_or_else(|| DaemonError::invalid(key, "must be a non-negative integer"))
    }

    /// Deserialize a required structured parameter.
    pub fn get_typed<T: DeserializeOwned>(&self, key: &str) -> Result<T, DaemonError> {
        let value = self.inner.get(key).ok_or_else(|| missing(key))?;
        serde_json::from_value(value.clone()).map_err(|e| DaemonError::invalid(key, e.to_string()))
    }

    /// Deserialize an optional structured parameter; absent or null yields the default.
    pub fn get_typed_or_default<T>(&self, key: &str) -> Result<T, DaemonError>
    where
        T: DeserializeOwned + Default,
    {
        match self.inner.get(key) {
            None | Some(serde_json::Value::Null) => Ok(T::default()),
            Some(_) => self.get_typed(key),
        }
    }

    /// The `service` parameter parsed as a service type.
    pub fn get_service(&self) -> Result<ServiceType, DaemonError> {
        self.get_string("service")?.parse()
    }

    pub fn has(&self, key: &str) -> bool {
        self.inner.get(key).is_some()
    }
}

impl From<serde_json::Value> for CommandParams {
    fn from(value: serde_json::Value) -> Self {
        Self::new(value)
    }
}

/// Result of command execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub success: bool,
    /// Result data. A failed result may still carry data describing what happened.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CommandResult {
    /// Create a success result with data.
    pub fn success(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error_code: None,
            error_message: None,
        }
    }

    /// Create a failure result.
    pub fn failure(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error_code: Some(code.into()),
            error_message: Some(message.into()),
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// Execution context for a command.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: Uuid,
    pub peer: PeerInfo,
    /// Unix time the request was received.
    pub timestamp: u64,
    pub command: String,
}

impl ExecutionContext {
    pub fn new(request_id: Uuid, peer: PeerInfo, timestamp: u64, command: String) -> Self {
        Self {
            request_id,
            peer,
            timestamp,
            command,
        }
    }
}
