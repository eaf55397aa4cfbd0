//! Request types for the daemon protocol.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

fn empty_params() -> serde_json::Value {
    serde_json::json!({})
}

/// A request from a client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// The command to execute (e.g., "service.apply", "health.detailed").
    pub command: String,

    /// Command parameters as a JSON object.
    #[serde(default = "empty_params")]
    pub params: serde_json::Value,

    /// Client-chosen correlation id, echoed in the response. The daemon
    /// assigns one when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<Uuid>,
}

impl Request {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            params: empty_params(),
            request_id: None,
        }
    }

    /// Add a parameter to the request (builder pattern).
    pub fn with_param(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        if let Some(obj) = self.params.as_object_mut() {
            obj.insert(key.to_string(), value.into());
        }
        self
    }

    pub fn with_request_id(mut self, id: Uuid) -> Self {
        self.request_id = Some(id);
        self
    }
}
