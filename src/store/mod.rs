//! Config store writer.
//!
//! Replaces on-disk config files so that readers only ever observe the old
//! or the new content, and keeps a timestamped backup of the file being
//! replaced so a rejected config can be restored.
//!
//! ## Write order
//!
//! 1. Copy the current file into the backup directory. A failure here
//!    aborts before the target is touched.
//! 2. Write and sync the new content to a temp file beside the target.
//! 3. Rename the temp file over the target and sync the directory.

mod atomic;
mod backup;

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{DaemonError, DaemonResult, StoreErrorKind};

use atomic::StagedFile;
pub use backup::ConfigBackup;

/// Mode for config files that did not exist before.
const DEFAULT_MODE: u32 = 0o644;

/// Outcome of a write, needed to undo it.
#[derive(Debug, Clone, Serialize)]
pub struct BackupHandle {
    pub path: PathBuf,
    /// `None` when the file did not exist or nothing changed.
    pub backup: Option<ConfigBackup>,
    /// SHA-256 of the content now on disk.
    pub content_hash: String,
    /// False when the new content matched the old byte for byte.
    pub changed: bool,
}

/// Writes config files atomically with backups.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    backup_dir: PathBuf,
}

impl ConfigStore {
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
        }
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Current content of `path`, or `None` if it does not exist.
    pub fn read(&self, path: &Path) -> DaemonResult<Option<Vec<u8>>> {
        match fs::read(path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(DaemonError::Store {
                kind: StoreErrorKind::Backup {
                    path: path.to_path_buf(),
                    message: format!("cannot read current file: {}", e),
                },
            }),
        }
    }

    /// Replace `path` with `content`, backing up the previous file first.
    ///
    /// Identical content is left alone: no backup, no write.
    pub fn write(&self, path: &Path, content: &str) -> DaemonResult<BackupHandle> {
        let content_hash = content_hash(content.as_bytes());
        let existing = self.read(path)?;

        if existing.as_deref() == Some(content.as_bytes()) {
            debug!(path = %path.display(), hash = %content_hash, "Config unchanged, skipping write");
            return Ok(BackupHandle {
                path: path.to_path_buf(),
                backup: None,
                content_hash,
                changed: false,
            });
        }

        let (backup, mode) = if existing.is_some() {
            let backup = backup::create(path, &self.backup_dir).map_err(|e| DaemonError::Store {
                kind: StoreErrorKind::Backup {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                },
            })?;
            debug!(
                path = %path.display(),
                backup = %backup.backup_path.display(),
                "Backed up config"
            );
            (Some(backup), existing_mode(path))
        } else {
            (None, DEFAULT_MODE)
        };

        replace(path, content.as_bytes(), mode).map_err(|e| DaemonError::Store {
            kind: StoreErrorKind::Write {
                path: path.to_path_buf(),
                message: e.to_string(),
            },
        })?;

        info!(
            path = %path.display(),
            hash = %content_hash,
            bytes = content.len(),
            backed_up = backup.is_some(),
            "Config written"
        );

        Ok(BackupHandle {
            path: path.to_path_buf(),
            backup,
            content_hash,
            changed: true,
        })
    }

    /// Undo the write recorded in `handle`.
    ///
    /// The file returns to the backed-up bytes, or is removed if it did not
    /// exist before the write.
    pub fn restore(&self, handle: &BackupHandle) -> DaemonResult<()> {
        if !handle.changed {
            return Ok(());
        }

        let restore_error = |message: String| DaemonError::Store {
            kind: StoreErrorKind::Restore {
                path: handle.path.clone(),
                message,
            },
        };

        match &handle.backup {
            Some(backup) => {
                let bytes = fs::read(&backup.backup_path).map_err(|e| {
                    restore_error(format!(
                        "cannot read backup {}: {}",
                        backup.backup_path.display(),
                        e
                    ))
                })?;
                let mode = fs::metadata(&backup.backup_path)
                    .map(|m| m.permissions().mode() & 0o7777)
                    .unwrap_or(DEFAULT_MODE);
                replace(&handle.path, &bytes, mode).map_err(|e| restore_error(e.to_string()))?;
            }
            None => match fs::remove_file(&handle.path) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(restore_error(e.to_string())),
            },
        }

        info!(path = %handle.path.display(), "Config restored from backup");
        Ok(())
    }

    /// Backups of `path`, oldest first.
    pub fn list_backups(&self, path: &Path) -> DaemonResult<Vec<ConfigBackup>> {
        backup::list(path, &self.backup_dir).map_err(|e| DaemonError::Store {
            kind: StoreErrorKind::Backup {
                path: path.to_path_buf(),
                message: format!("cannot list backups: {}", e),
            },
        })
    }

    /// Delete all but the newest `keep` backups of `path`, returning the
    /// deleted ones.
    pub fn prune_backups(&self, path: &Path, keep: usize) -> DaemonResult<Vec<ConfigBackup>> {
        let backups = self.list_backups(path)?;
        let excess = backups.len().saturating_sub(keep);
        let mut removed = Vec::with_capacity(excess);

        for backup in backups.into_iter().take(excess) {
            match fs::remove_file(&backup.backup_path) {
                Ok(()) => removed.push(backup),
                Err(e) => warn!(
                    backup = %backup.backup_path.display(),
                    error = %e,
                    "Failed to remove backup"
                ),
            }
        }

        if !removed.is_empty() {
            info!(path = %path.display(), removed = removed.len(), keep, "Pruned backups");
        }
        Ok(removed)
    }
}

/// Hex SHA-256 of `content`.
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

fn replace(path: &Path, content: &[u8], mode: u32) -> io::Result<()> {
    StagedFile::stage(path, content, mode)?.commit()
}

fn existing_mode(path: &Path) -> u32 {
    fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .unwrap_or(DEFAULT_MODE)
}
