use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::PersistenceError;
use crate::fs_util;

use super::state::QueueState;

/// On-disk envelope around a `QueueState`: the state itself plus a checksum
/// computed over its canonical byte representation, so corruption (a
/// truncated write, a flipped bit from disk failure) is detected on load
/// rather than silently resuming from garbage.
#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    checksum: String,
    state: QueueState,
}

fn checksum_of(state: &QueueState) -> String {
    blake3::hash(&state.canonical_bytes()).to_hex().to_string()
}

/// Durable store for a single queue's snapshot, including corruption
/// backup rotation. One instance owns one snapshot path.
pub struct SnapshotStore {
    path: PathBuf,
    backup_retention: usize,
}

impl SnapshotStore {
    pub fn new(path: impl Into<PathBuf>, backup_retention: usize) -> Self {
        SnapshotStore {
            path: path.into(),
            backup_retention,
        }
    }

    pub fn save(&self, state: &QueueState) -> Result<(), PersistenceError> {
        let snapshot = Snapshot {
            checksum: checksum_of(state),
            state: state.clone(),
        };
        let bytes = serde_json::to_vec(&snapshot)?;
        fs_util::atomic_write(&self.path, &bytes)
    }

    /// Loads the snapshot, verifying its checksum. On a checksum mismatch
    /// the corrupted file is rotated into a timestamped backup (oldest
    /// beyond the retention count deleted) and `Corruption` is returned so
    /// the caller (the recovery service) can decide whether to fall back to
    /// an older backup or start fresh.
    pub fn load(&self) -> Result<Option<QueueState>, PersistenceError> {
        let Some(bytes) = fs_util::read_if_exists(&self.path)? else {
            return Ok(None);
        };
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let computed = checksum_of(&snapshot.state);
        if computed != snapshot.checksum {
            self.quarantine_corrupted()?;
            return Err(PersistenceError::Corruption {
                expected: snapshot.checksum,
                computed,
            });
        }
        Ok(Some(snapshot.state))
    }

    /// Best-effort read of the raw snapshot bytes without checksum
    /// verification. Used only to estimate `itemsLost` when corruption
    /// forces a fall back to backup: the corrupted file's bytes are left in
    /// place by `quarantine_corrupted`, so the item count it held can still
    /// usually be recovered even though the checksum no longer matches.
    pub fn load_ignoring_checksum(&self) -> Option<QueueState> {
        let bytes = fs_util::read_if_exists(&self.path).ok()??;
        let snapshot: Snapshot = serde_json::from_slice(&bytes).ok()?;
        Some(snapshot.state)
    }

    fn quarantine_corrupted(&self) -> Result<(), PersistenceError> {
        let timestamp = chrono::Utc::now().format("%Y%m%dT%H%M%S%.3f").to_string();
        let backup = fs_util::backup_path_for(&self.path, &timestamp);
        if let Some(bytes) = fs_util::read_if_exists(&self.path)? {
            fs_util::atomic_write(&backup, &bytes)?;
        }
        let _ = fs_util::rotate_backups(&self.path, self.backup_retention);
        Ok(())
    }

    /// Lists available corruption backups, newest first, for the recovery
    /// service to try in order when `allow_corrupted`/`use_backup` is set.
    pub fn list_backups(&self) -> std::io::Result<Vec<PathBuf>> {
        let Some(parent) = self.path.parent() else {
            return Ok(Vec::new());
        };
        let prefix = format!(
            "{}.corrupted.",
            self.path.file_name().unwrap_or_default().to_string_lossy()
        );
        let mut backups: Vec<PathBuf> = std::fs::read_dir(parent)?
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
        Ok(backups)
    }

    pub fn load_backup(&self, backup: &Path) -> Result<QueueState, PersistenceError> {
        let bytes = fs_util::read_if_exists(backup)?.ok_or(PersistenceError::Unrecoverable)?;
        let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
        let computed = checksum_of(&snapshot.state);
        if computed != snapshot.checksum {
            return Err(PersistenceError::Corruption {
                expected: snapshot.checksum,
                computed,
            });
        }
        Ok(snapshot.state)
    }
}
