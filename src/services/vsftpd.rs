//! vsftpd (FTP) service kind.

use crate::error::DaemonError;

use super::model::{ServiceConfig, ServiceDefinition, ServiceType, ShareRecord};
use super::traits::{wrong_configuration, ServiceKind};

/// vsftpd serves one tree, so at most one FTP share may be enabled.
pub struct VsftpdKind;

impl ServiceKind for VsftpdKind {
    fn service_type(&self) -> ServiceType {
        ServiceType::Ftp
    }

    fn display_name(&self) -> &'static str {
        "vsftpd"
    }

    fn template(&self) -> &'static str {
        "ftp/vsftpd.conf.tera"
    }

    fn render_context(
        &self,
        definition: &ServiceDefinition,
        shares: &[&ShareRecord],
    ) -> Result<serde_json::Value, DaemonError> {
        let ServiceConfig::Ftp(config) = &definition.configuration else {
            return Err(wrong_configuration(definition, ServiceType::Ftp));
        };

        let root = match shares {
            [] => None,
            [share] => Some(*share),
            _ => {
                return Err(DaemonError::invalid(
                    "shares",
                    format!("vsftpd serves a single root, got {} shares", shares.len()),
                ));
            }
        };

        let write_enable = root.map(|s| !s.read_only).unwrap_or(false);
        let anonymous = root.map(|s| s.guest_allowed).unwrap_or(false);

        Ok(serde_json::json!({
            "listen_port": config.listen_port,
            "listen_address": config.listen_address,
            "anonymous_enable": anonymous,
            "anon_root": if anonymous { root.map(|s| s.path.as_str()) } else { None },
            "local_enable": config.local_enable,
            "write_enable": write_enable,
            "local_root": root.map(|s| s.path.as_str()),
            "chroot_local_user": config.chroot_local_user,
            "max_clients": config.max_clients,
            "pasv_min_port": config.pasv_min_port,
            "pasv_max_port": config.pasv_max_port,
            "banner": config.banner,
            "ssl_enable": config.ssl_enable,
            "rsa_cert_file": config.rsa_cert_file,
        }))
    }

    // vsftpd rereads its config per session but keeps its listening socket.
    fn restart_directives(&self) -> &'static [&'static str] {
        &[
            "listen",
            "listen_ipv6",
            "listen_port",
            "listen_address",
            "ssl_enable",
            "rsa_cert_file",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::model::FtpConfig;
    use crate::templates::TemplateEngine;

    fn render(config: FtpConfig, shares: &[&ShareRecord]) -> Result<String, DaemonError> {
        let definition = ServiceDefinition::new(ServiceConfig::Ftp(config));
        let context = VsftpdKind.render_context(&definition, shares)?;
        TemplateEngine::builtin()?.render(VsftpdKind.template(), &context)
    }

    #[test]
    fn test_writable_root() {
        let share = ShareRecord::new("ftp", "/srv/ftp", ServiceType::Ftp);
        let output = render(FtpConfig::default(), &[&share]).unwrap();

        assert!(output.contains("listen_port=21\n"));
        assert!(output.contains("local_root=/srv/ftp\n"));
        assert!(output.contains("write_enable=YES\n"));
        assert!(output.contains("allow_writeable_chroot=YES\n"));
        assert!(output.contains("anonymous_enable=NO\n"));
        assert!(!output.contains("anon_root"));
    }

    #[test]
    fn test_guest_read_only_root() {
        let mut share = ShareRecord::new("pub", "/srv/pub", ServiceType::Ftp);
        share.read_only = true;
        share.guest_allowed = true;
        let config = FtpConfig {
            pasv_min_port: Some(40000),
            pasv_max_port: Some(40100),
            ..FtpConfig::default()
        };

        let output = render(config, &[&share]).unwrap();
        assert!(output.contains("anonymous_enable=YES\nanon_root=/srv/pub\n"));
        assert!(output.contains("write_enable=NO\n"));
        assert!(output.contains("pasv_min_port=40000\npasv_max_port=40100\n"));
    }

    #[test]
    fn test_no_share() {
        let output = render(FtpConfig::default(), &[]).unwrap();
        assert!(output.contains("write_enable=NO\n"));
        assert!(!output.contains("local_root"));
    }

    #[test]
    fn test_multiple_roots_rejected() {
        let a = ShareRecord::new("a", "/srv/a", ServiceType::Ftp);
        let b = ShareRecord::new("b", "/srv/b", ServiceType::Ftp);
        assert!(render(FtpConfig::default(), &[&a, &b]).is_err());
    }
}
