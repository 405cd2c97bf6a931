//! Shared atomic file write primitive.
//!
//! Persistence (queue snapshots), the manifest, and Markdown/attachment
//! output all need the same durability guarantee: either the old file is
//! still intact, or the new one is, never a half-written file. Rather than
//! each caller hand-rolling its own temp-then-rename dance, they all funnel
//! through `atomic_write`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::PersistenceError;

/// Writes `bytes` to `path` atomically: write to a sibling temp file, fsync
/// it, then rename over the destination. On any failure the temp file is
/// removed so it never lingers next to the real path.
pub fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), PersistenceError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(PersistenceError::Write)?;
    }
    let tmp_path = tmp_path_for(path);
    let result = (|| -> Result<(), std::io::Error> {
        let mut file = File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result.map_err(PersistenceError::Write)
}

/// Reads the full contents of `path`, returning `Ok(None)` when it is
/// simply absent (not yet ever written) rather than treating that as an
/// error.
pub fn read_if_exists(path: &Path) -> Result<Option<Vec<u8>>, PersistenceError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(PersistenceError::Read(e)),
    }
}

fn tmp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "tmp".to_string());
    let pid = std::process::id();
    path.with_file_name(format!(".{file_name}.tmp.{pid}"))
}

/// Lists backup files matching `<stem>.corrupted.*` next to `path`, newest
/// first, and deletes all but the newest `keep` of them.
pub fn rotate_backups(path: &Path, keep: usize) -> std::io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    let prefix = format!(
        "{}.corrupted.",
        path.file_name().unwrap_or_default().to_string_lossy()
    );
    let mut backups: Vec<PathBuf> = fs::read_dir(parent)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| {
            p.file_name()
                .map(|n| n.to_string_lossy().starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    backups.sort();
    backups.reverse();
    for stale in backups.into_iter().skip(keep) {
        let _ = fs::remove_file(stale);
    }
    Ok(())
}

/// Builds the path for a new corruption backup, timestamped so rotation can
/// sort newest-first lexically.
pub fn backup_path_for(path: &Path, timestamp: &str) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "snapshot".to_string());
    path.with_file_name(format!("{file_name}.corrupted.{timestamp}"))
}
