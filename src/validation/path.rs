//! Share path validation.

use std::path::{Component, Path, PathBuf};

use crate::error::{DaemonError, ValidationErrorKind};

/// Validate an exported filesystem path.
///
/// Rules:
/// - Must not be empty
/// - Must be absolute
/// - Must not contain `..` components
///
/// Characters that would break a config file's syntax are left to the
/// template engine, which rejects them at render time.
pub fn validate_share_path(path: &str) -> Result<PathBuf, DaemonError> {
    if path.is_empty() {
        return Err(DaemonError::invalid("path", "Path cannot be empty"));
    }

    let parsed = Path::new(path);

    if !parsed.is_absolute() {
        return Err(DaemonError::Validation {
            kind: ValidationErrorKind::RelativePath {
                path: parsed.to_path_buf(),
            },
        });
    }

    if parsed.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(DaemonError::Validation {
            kind: ValidationErrorKind::PathTraversal {
                path: parsed.to_path_buf(),
            },
        });
    }

    Ok(parsed.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_paths() {
        assert!(validate_share_path("/mnt/docs").is_ok());
        assert!(validate_share_path("/srv/tank/media files").is_ok());
    }

    #[test]
    fn test_invalid_paths() {
        assert!(validate_share_path("").is_err());
        assert!(matches!(
            validate_share_path("mnt/docs"),
            Err(DaemonError::Validation {
                kind: ValidationErrorKind::RelativePath { .. }
            })
        ));
        assert!(matches!(
            validate_share_path("/mnt/../etc"),
            Err(DaemonError::Validation {
                kind: ValidationErrorKind::PathTraversal { .. }
            })
        ));
    }

    #[test]
    fn test_line_breaks_are_left_to_the_renderer() {
        assert!(validate_share_path("/mnt/docs\nguest ok = yes").is_ok());
    }
}
