//! Temp-file-and-rename writes.

use std::fs::{self, File, OpenOptions, Permissions};
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

/// Content fully written and synced next to its target, not yet visible
/// under the target name.
///
/// Dropping a staged file without committing removes the temp file, so an
/// interrupted write leaves the target untouched.
#[derive(Debug)]
pub(crate) struct StagedFile {
    temp_path: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    /// Write `content` to a fresh temp file in the target's directory.
    pub(crate) fn stage(target: &Path, content: &[u8], mode: u32) -> io::Result<Self> {
        let parent = parent_dir(target);
        if !parent.exists() {
            fs::create_dir_all(parent)?;
        }

        // Random suffix plus O_EXCL so a pre-created symlink cannot redirect the write.
        let temp_name = format!(
            ".{}.{}.tmp",
            target.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4().simple()
        );
        let temp_path = target.with_file_name(temp_name);

        let staged = Self {
            temp_path,
            target: target.to_path_buf(),
            committed: false,
        };

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&staged.temp_path)?;
        file.write_all(content)?;
        file.set_permissions(Permissions::from_mode(mode))?;
        file.sync_all()?;

        debug!(temp = %staged.temp_path.display(), bytes = content.len(), "Staged config write");
        Ok(staged)
    }

    /// Atomically replace the target with the staged content.
    pub(crate) fn commit(mut self) -> io::Result<()> {
        fs::rename(&self.temp_path, &self.target)?;
        self.committed = true;
        sync_dir(parent_dir(&self.target));
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn temp_path(&self) -> &Path {
        &self.temp_path
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = fs::remove_file(&self.temp_path) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(temp = %self.temp_path.display(), error = %e, "Failed to remove temp file");
                }
            }
        }
    }
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}

/// Persist the rename itself. Failure only weakens durability, the new
/// content is already visible.
fn sync_dir(dir: &Path) {
    if let Err(e) = File::open(dir).and_then(|d| d.sync_all()) {
        warn!(dir = %dir.display(), error = %e, "Failed to sync directory");
    }
}
