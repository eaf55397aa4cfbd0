//! Response types for the daemon protocol.

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::DaemonError;

/// Replace messages that could disclose daemon internals.
///
/// Domain errors (render, store, control, validation) pass through: their
/// messages and details are what callers act on.
fn sanitize_error_message(code: &str, original: String) -> String {
    match code {
        "AUTH_ERROR" => "Authentication failed".to_string(),
        "IO_ERROR" => "Internal I/O error".to_string(),
        "INTERNAL_ERROR" => "Internal server error".to_string(),
        "SOCKET_ERROR" | "CONFIG_ERROR" => "Daemon error".to_string(),
        _ => original,
    }
}

/// A response from the daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,

    /// Correlates the response with its request.
    pub request_id: Uuid,

    /// Response data. Present on success and on failures that carry an outcome.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorResponse>,
}

/// Error details in a response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Stable machine code (e.g., "RENDER_ERROR", "CONCURRENT_MODIFICATION").
    pub code: String,

    pub message: String,

    /// Structured context such as paths, exit codes and stderr.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl Response {
    pub fn success(request_id: Uuid, data: serde_json::Value) -> Self {
        Self {
            success: true,
            request_id,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response. The message is sanitized for internal codes.
    pub fn error(request_id: Uuid, code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let original = message.into();

        debug!(
            request_id = %request_id,
            code = %code,
            message = %original,
            "Error response"
        );

        Self {
            success: false,
            request_id,
            data: None,
            error: Some(ErrorResponse {
                message: sanitize_error_message(&code, original),
                code,
                details: None,
            }),
        }
    }

    /// Error response carrying the error's code and details.
    pub fn from_error(request_id: Uuid, error: &DaemonError) -> Self {
        let mut response = Self::error(request_id, error.code(), error.to_string());
        if let Some(body) = response.error.as_mut() {
            body.details = error.details();
        }
        response
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AuthErrorKind, TemplateErrorKind};

    #[test]
    fn test_success_response() {
        let response = Response::success(Uuid::new_v4(), serde_json::json!({"result": "ok"}));
        assert!(response.success);

        let json = serde_json::to_string(&response).unwrap();
        assert!(json.contains("\"success\":true"));
        assert!(!json.contains("\"error\""));
    }

    #[test]
    fn test_domain_error_keeps_message_and_details() {
        let error = DaemonError::Template {
            kind: TemplateErrorKind::Render {
                template: "smb/smb.conf.tera".to_string(),
                message: "shares[0].path contains a line break".to_string(),
            },
        };
        let response = Response::from_error(Uuid::new_v4(), &error);
        let body = response.error.unwrap();

        assert_eq!(body.code, "RENDER_ERROR");
        assert!(body.message.contains("line break"));
        assert_eq!(body.details.unwrap()["template"], "smb/smb.conf.tera");
    }

    #[test]
    fn test_auth_error_is_sanitized() {
        let error = DaemonError::Auth {
            kind: AuthErrorKind::UnauthorizedPeer { uid: 1234 },
        };
        let body = Response::from_error(Uuid::new_v4(), &error).error.unwrap();
        assert_eq!(body.code, "AUTH_ERROR");
        assert_eq!(body.message, "Authentication failed");
    }
}
