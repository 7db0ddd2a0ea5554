use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, SyncError};

/// `<path>.bak`
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Write `contents` to `path`, keeping the previous file as `<path>.bak`.
///
/// When the write fails, the backup is moved back so the original file is
/// never left missing. Without a previous file no backup is made.
pub fn write_with_backup(path: &Path, contents: &str) -> Result<()> {
    replace_with(path, |target| fs::write(target, contents))?;
    debug!(path = %path.display(), bytes = contents.len(), "File written");
    Ok(())
}

fn replace_with(path: &Path, write: impl FnOnce(&Path) -> io::Result<()>) -> Result<()> {
    let backup = backup_path(path);
    let backed_up = if path.is_file() {
        fs::rename(path, &backup).map_err(|err| SyncError::write(path, err))?;
        true
    } else {
        false
    };

    if let Err(err) = write(path) {
        if backed_up {
            restore_backup(path, &backup);
        }
        return Err(SyncError::write(path, err));
    }
    Ok(())
}

fn restore_backup(path: &Path, backup: &Path) {
    if path.exists() {
        let _ = fs::remove_file(path);
    }
    if let Err(err) = fs::rename(backup, path) {
        warn!(
            path = %path.display(),
            backup = %backup.display(),
            error = %err,
            "Failed to restore backup after write error"
        );
    }
}
