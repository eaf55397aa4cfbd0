//! Service kind trait.
//!
//! Defines what differs between the managed protocols.

use std::path::Path;

use crate::error::DaemonError;

use super::model::{ServiceDefinition, ServiceType, ShareRecord};

/// Protocol-specific behavior of a managed service.
///
/// A kind knows which template renders its config, how to turn a service
/// definition plus its shares into a template context, and which settings
/// the running daemon cannot pick up on reload.
///
/// # Example
///
/// ```ignore
/// pub struct AfpKind;
///
/// impl ServiceKind for AfpKind {
///     fn service_type(&self) -> ServiceType { ... }
///     fn display_name(&self) -> &'static str { "Netatalk" }
///     fn template(&self) -> &'static str { "afp/afp.conf.tera" }
///     fn render_context(&self, definition, shares) -> Result<Value, DaemonError> { ... }
/// }
/// ```
pub trait ServiceKind: Send + Sync {
    fn service_type(&self) -> ServiceType;

    /// Human-readable display name (e.g., "Samba").
    fn display_name(&self) -> &'static str;

    /// Template name relative to the templates directory.
    fn template(&self) -> &'static str;

    /// Build the template context.
    ///
    /// `shares` are already validated, enabled and sorted by name.
    fn render_context(
        &self,
        definition: &ServiceDefinition,
        shares: &[&ShareRecord],
    ) -> Result<serde_json::Value, DaemonError>;

    /// Global directives whose change needs a full restart.
    ///
    /// Keys are compared case-insensitively with whitespace collapsed.
    fn restart_directives(&self) -> &'static [&'static str] {
        &[]
    }

    /// Syntax check run against the written config, as argv.
    fn check_command(&self, _config_path: &Path) -> Option<Vec<String>> {
        None
    }
}

/// Error for a definition whose configuration belongs to another kind.
pub(crate) fn wrong_configuration(definition: &ServiceDefinition, expected: ServiceType) -> DaemonError {
    DaemonError::invalid(
        "configuration",
        format!(
            "service '{}' carries {} configuration, expected {}",
            definition.name,
            definition.configuration.service_type(),
            expected
        ),
    )
}
