//! NFS server service kind.

use crate::error::DaemonError;

use super::model::{ServiceConfig, ServiceDefinition, ServiceType, ShareRecord};
use super::traits::{wrong_configuration, ServiceKind};

/// Kernel NFS server driven by /etc/exports.
pub struct NfsKind;

impl ServiceKind for NfsKind {
    fn service_type(&self) -> ServiceType {
        ServiceType::Nfs
    }

    fn display_name(&self) -> &'static str {
        "NFS Server"
    }

    fn template(&self) -> &'static str {
        "nfs/exports.tera"
    }

    fn render_context(
        &self,
        definition: &ServiceDefinition,
        shares: &[&ShareRecord],
    ) -> Result<serde_json::Value, DaemonError> {
        let ServiceConfig::Nfs(config) = &definition.configuration else {
            return Err(wrong_configuration(definition, ServiceType::Nfs));
        };

        let mut exports = Vec::with_capacity(shares.len());
        for share in shares {
            let hosts = if share.allowed_networks.is_empty() {
                &config.default_clients
            } else {
                &share.allowed_networks
            };
            if hosts.is_empty() {
                return Err(DaemonError::invalid(
                    "allowed_networks",
                    format!("export '{}' has no allowed clients", share.name),
                ));
            }

            let mut options = vec![if share.read_only { "ro" } else { "rw" }.to_string()];
            options.extend(config.default_options.iter().cloned());
            options.push(
                if config.root_squash {
                    "root_squash"
                } else {
                    "no_root_squash"
                }
                .to_string(),
            );
            if share.guest_allowed {
                options.push("all_squash".to_string());
            }
            let options = options.join(",");

            let clients: Vec<serde_json::Value> = hosts
                .iter()
                .map(|host| serde_json::json!({ "host": host, "options": options }))
                .collect();

            exports.push(serde_json::json!({
                "name": share.name,
                "path": share.path,
                "clients": clients,
            }));
        }

        Ok(serde_json::json!({ "exports": exports }))
    }
}
