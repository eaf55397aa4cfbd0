//! Share name, user and client network validation.

use std::net::IpAddr;

use crate::error::DaemonError;

/// Samba limits share names to 80 characters.
const MAX_SHARE_NAME_LENGTH: usize = 80;

/// Section names with special meaning in smb.conf.
const RESERVED_SHARE_NAMES: &[&str] = &["global", "homes", "printers", "print$"];

/// Maximum length for user and group names.
const MAX_USERNAME_LENGTH: usize = 64;

/// Validate a share name.
///
/// Rules:
/// - Must not be empty or exceed 80 characters
/// - Must not be one of the reserved smb.conf section names
pub fn validate_share_name(name: &str) -> Result<&str, DaemonError> {
    if name.trim().is_empty() {
        return Err(DaemonError::invalid("name", "Share name cannot be empty"));
    }

    if name.chars().count() > MAX_SHARE_NAME_LENGTH {
        return Err(DaemonError::invalid(
            "name",
            format!("Share name exceeds {} characters", MAX_SHARE_NAME_LENGTH),
        ));
    }

    if RESERVED_SHARE_NAMES.contains(&name.to_lowercase().as_str()) {
        return Err(DaemonError::invalid(
            "name",
            format!("'{}' is a reserved section name", name),
        ));
    }

    Ok(name)
}

/// Validate a user or group entry of an access list.
///
/// Accepts `user`, `@group`, `+group` and `DOMAIN\user`. List separators
/// and whitespace are rejected since entries are joined into one directive.
pub fn validate_access_user(user: &str) -> Result<&str, DaemonError> {
    let name = user.trim_start_matches(['@', '+', '&']);

    if name.is_empty() || user.len() > MAX_USERNAME_LENGTH {
        return Err(DaemonError::invalid(
            "valid_users",
            format!("Invalid user entry '{}'", user),
        ));
    }

    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '\\' | '$');
    if !name.chars().all(allowed) {
        return Err(DaemonError::invalid(
            "valid_users",
            format!("User entry '{}' contains invalid characters", user),
        ));
    }

    Ok(user)
}

/// Validate an NFS client specification.
///
/// Accepts `*`, host names (with `*`/`?` wildcards), `@netgroup`, IP
/// addresses and CIDR networks.
pub fn validate_client_network(spec: &str) -> Result<&str, DaemonError> {
    if spec.is_empty() {
        return Err(DaemonError::invalid(
            "allowed_networks",
            "Client specification cannot be empty",
        ));
    }

    if let Some((addr, prefix)) = spec.split_once('/') {
        let ip: IpAddr = addr.parse().map_err(|_| {
            DaemonError::invalid(
                "allowed_networks",
                format!("'{}' is not a valid network address", spec),
            )
        })?;
        let max_prefix = if ip.is_ipv4() { 32 } else { 128 };
        let valid_prefix = prefix
            .parse::<u8>()
            .map(|p| p <= max_prefix)
            .unwrap_or(false);
        // exports(5) also accepts dotted netmasks.
        let valid_mask = ip.is_ipv4() && prefix.parse::<std::net::Ipv4Addr>().is_ok();
        if !valid_prefix && !valid_mask {
            return Err(DaemonError::invalid(
                "allowed_networks",
                format!("'{}' has an invalid prefix length", spec),
            ));
        }
        return Ok(spec);
    }

    let host = spec.strip_prefix('@').unwrap_or(spec);
    let allowed = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '*' | '?' | ':');
    if host.is_empty() || !host.chars().all(allowed) {
        return Err(DaemonError::invalid(
            "allowed_networks",
            format!("'{}' is not a valid client specification", spec),
        ));
    }

    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_share_names() {
        assert!(validate_share_name("docs").is_ok());
        assert!(validate_share_name("Team Media").is_ok());
        assert!(validate_share_name("").is_err());
        assert!(validate_share_name("Global").is_err());
        assert!(validate_share_name(&"x".repeat(81)).is_err());
    }

    #[test]
    fn test_access_users() {
        assert!(validate_access_user("alice").is_ok());
        assert!(validate_access_user("@staff").is_ok());
        assert!(validate_access_user("CORP\\bob").is_ok());
        assert!(validate_access_user("alice bob").is_err());
        assert!(validate_access_user("alice,bob").is_err());
        assert!(validate_access_user("@").is_err());
    }

    #[test]
    fn test_client_networks() {
        assert!(validate_client_network("*").is_ok());
        assert!(validate_client_network("192.168.1.0/24").is_ok());
        assert!(validate_client_network("10.0.0.0/255.0.0.0").is_ok());
        assert!(validate_client_network("fd00::/64").is_ok());
        assert!(validate_client_network("*.lan.example").is_ok());
        assert!(validate_client_network("@trusted").is_ok());
        assert!(validate_client_network("192.168.1.0/33").is_err());
        assert!(validate_client_network("host(rw)").is_err());
        assert!(validate_client_network("a b").is_err());
    }
}
