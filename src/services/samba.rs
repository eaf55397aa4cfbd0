//! Samba (SMB) service kind.

use std::path::Path;

use crate::error::DaemonError;

use super::model::{ServiceConfig, ServiceDefinition, ServiceType, ShareRecord};
use super::traits::{wrong_configuration, ServiceKind};

/// Samba file server.
pub struct SambaKind;

impl ServiceKind for SambaKind {
    fn service_type(&self) -> ServiceType {
        ServiceType::Smb
    }

    fn display_name(&self) -> &'static str {
        "Samba"
    }

    fn template(&self) -> &'static str {
        "smb/smb.conf.tera"
    }

    fn render_context(
        &self,
        definition: &ServiceDefinition,
        shares: &[&ShareRecord],
    ) -> Result<serde_json::Value, DaemonError> {
        let ServiceConfig::Smb(config) = &definition.configuration else {
            return Err(wrong_configuration(definition, ServiceType::Smb));
        };

        let shares: Vec<serde_json::Value> = shares
            .iter()
            .map(|share| {
                serde_json::json!({
                    "name": share.name,
                    "path": share.path,
                    "comment": share.comment,
                    "read_only": share.read_only,
                    "guest_ok": share.guest_allowed,
                    "valid_users": share.valid_users.join(" "),
                    "hosts_allow": share.allowed_networks.join(" "),
                })
            })
            .collect();

        Ok(serde_json::json!({
            "global": {
                "workgroup": config.workgroup,
                "server_string": config.server_string,
                "netbios_name": config.netbios_name,
                "interfaces": config.interfaces.join(" "),
                "bind_interfaces_only": config.bind_interfaces_only,
                "map_to_guest": config.map_to_guest,
                "min_protocol": config.min_protocol,
                "log_level": config.log_level,
            },
            "shares": shares,
        }))
    }

    // smbd binds sockets and registers its name at startup only.
    fn restart_directives(&self) -> &'static [&'static str] {
        &["interfaces", "bind interfaces only", "netbios name", "smb ports"]
    }

    fn check_command(&self, config_path: &Path) -> Option<Vec<String>> {
        Some(vec![
            "testparm".to_string(),
            "-s".to_string(),
            "--suppress-prompt".to_string(),
            config_path.to_string_lossy().into_owned(),
        ])
    }
}
