//! Timestamped backup copies.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%.6fZ";

/// Collisions within one microsecond are resolved by bumping the stamp.
const MAX_NAME_ATTEMPTS: u32 = 1000;

/// Copy of a config file taken before it was replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigBackup {
    pub original_path: PathBuf,
    pub backup_path: PathBuf,
    pub timestamp: DateTime<Utc>,
}

/// Copy `original` into `backup_dir` under a unique timestamped name.
pub(crate) fn create(original: &Path, backup_dir: &Path) -> io::Result<ConfigBackup> {
    fs::create_dir_all(backup_dir)?;

    let file_name = original
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
        .to_string_lossy()
        .into_owned();

    let mut source = File::open(original)?;
    let source_permissions = source.metadata()?.permissions();

    let mut timestamp = Utc::now();
    for _ in 0..MAX_NAME_ATTEMPTS {
        let backup_path = backup_dir.join(format!(
            "{}.{}",
            file_name,
            timestamp.format(TIMESTAMP_FORMAT)
        ));

        let mut dest = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&backup_path)
        {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                timestamp += Duration::microseconds(1);
                continue;
            }
            Err(e) => return Err(e),
        };

        let copied = io::copy(&mut source, &mut dest)
            .and_then(|_| dest.set_permissions(source_permissions.clone()))
            .and_then(|_| dest.sync_all());
        if let Err(e) = copied {
            let _ = fs::remove_file(&backup_path);
            return Err(e);
        }

        return Ok(ConfigBackup {
            original_path: original.to_path_buf(),
            backup_path,
            timestamp,
        });
    }

    Err(io::Error::new(
        io::ErrorKind::AlreadyExists,
        "no free backup name",
    ))
}

/// Backups of `original` found in `backup_dir`, oldest first.
pub(crate) fn list(original: &Path, backup_dir: &Path) -> io::Result<Vec<ConfigBackup>> {
    let file_name = match original.file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => return Ok(Vec::new()),
    };
    let prefix = format!("{}.", file_name);

    let entries = match fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut backups = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stamp) = name.strip_prefix(&prefix) else {
            continue;
        };
        // Backups of e.g. `smb.conf.old` share the prefix but not the format.
        let Ok(naive) = NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT) else {
            continue;
        };
        backups.push(ConfigBackup {
            original_path: original.to_path_buf(),
            backup_path: entry.path(),
            timestamp: naive.and_utc(),
        });
    }

    backups.sort_by(|a, b| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.backup_path.cmp(&b.backup_path))
    });
    Ok(backups)
}
