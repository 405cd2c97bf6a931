use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::QueueItemStatus;
use crate::error::{AppError, PersistenceError};
use crate::queue::{QueueState, SnapshotStore};

/// How aggressively the recovery service should try to resume from a prior
/// run. Explicit fields rather than a single boolean: each corresponds to a
/// distinct decision an operator may want to make independently after an
/// unexpected shutdown.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeOptions {
    /// Resume even if the prior run looked like it finished normally.
    pub force_resume: bool,
    /// If the snapshot fails its checksum, fall back to a backup instead
    /// of failing the run outright.
    pub allow_corrupted: bool,
    /// Prefer the newest corruption backup over starting from scratch.
    pub use_backup: bool,
    /// Run the structural validation pass (§ below) before trusting a
    /// loaded snapshot.
    pub validate_integrity: bool,
    /// Attempt to repair (rather than reject) a snapshot that fails
    /// structural validation within tolerance.
    pub repair_corruption: bool,
}

impl Default for ResumeOptions {
    fn default() -> Self {
        ResumeOptions {
            force_resume: false,
            allow_corrupted: true,
            use_backup: true,
            validate_integrity: true,
            repair_corruption: true,
        }
    }
}

/// Structural checks beyond the checksum: things that could be internally
/// inconsistent even in a snapshot that deserialized cleanly. A snapshot
/// with `corruption_threshold` or more mismatches is treated the same as a
/// checksum failure.
const CORRUPTION_THRESHOLD: usize = 2;

fn validate_structure(state: &QueueState) -> usize {
    let mut mismatches = 0;
    for id in &state.processing_order {
        if !state.items.contains_key(id) {
            mismatches += 1;
        }
    }
    for id in &state.processed_pages {
        if let Some(item) = state.items.get(id) {
            if item.status != QueueItemStatus::Completed {
                mismatches += 1;
            }
        }
    }
    mismatches
}

/// Result of `recover`: the reconciled queue state, plus how many items
/// were lost if corruption forced a fall back to an older backup (0 when
/// the primary snapshot loaded cleanly or no snapshot existed at all).
#[derive(Debug)]
pub struct RecoveryOutcome {
    pub state: QueueState,
    pub items_lost: usize,
}

/// Runs the startup reconciliation sequence documented for the recovery
/// service:
///
/// 1. Load the snapshot, falling back through backups per `ResumeOptions`
///    when it is missing or corrupted.
/// 2. Structurally validate it; repair or reject depending on the
///    mismatch count and `repair_corruption`.
/// 3. Reset every `Processing` item back to `Pending` (the worker that was
///    handling it no longer exists) so the scheduler can re-submit it.
pub fn recover(store: &SnapshotStore, options: &ResumeOptions) -> Result<RecoveryOutcome, AppError> {
    let mut items_lost = 0usize;
    let mut state = match store.load() {
        Ok(Some(state)) => state,
        Ok(None) => {
            info!("no prior snapshot found, starting a fresh queue");
            return Ok(RecoveryOutcome { state: QueueState::new(usize::MAX), items_lost: 0 });
        }
        Err(PersistenceError::Corruption { .. }) if options.allow_corrupted => {
            warn!("snapshot failed checksum validation, attempting backup recovery");
            let original = store
                .load_ignoring_checksum()
                .map(|s| s.items.len())
                .unwrap_or(0);
            let restored = recover_from_backup(store, options)?;
            items_lost = original.saturating_sub(restored.items.len());
            if items_lost > 0 {
                warn!(items_lost, "backup recovery restored fewer items than the corrupted snapshot held");
            }
            restored
        }
        Err(e) => return Err(AppError::Recovery(e.to_string())),
    };

    if options.validate_integrity {
        let mismatches = validate_structure(&state);
        if mismatches >= CORRUPTION_THRESHOLD {
            if options.repair_corruption {
                warn!(mismatches, "repairing structurally inconsistent snapshot");
                state.repair_invariants();
            } else {
                return Err(AppError::Recovery(format!(
                    "snapshot has {mismatches} structural mismatches, repair disabled"
                )));
            }
        }
    }

    reconcile_in_flight(&mut state);
    Ok(RecoveryOutcome { state, items_lost })
}

fn recover_from_backup(store: &SnapshotStore, options: &ResumeOptions) -> Result<QueueState, AppError> {
    if !options.use_backup {
        info!("backup recovery disabled, starting a fresh queue");
        return Ok(QueueState::new(usize::MAX));
    }
    let backups = store
        .list_backups()
        .map_err(|e| AppError::Recovery(e.to_string()))?;
    for backup in backups {
        match store.load_backup(&backup) {
            Ok(state) => {
                info!(backup = %backup.display(), "recovered queue state from backup");
                return Ok(state);
            }
            Err(e) => {
                warn!(backup = %backup.display(), error = %e, "backup also failed validation, trying next");
            }
        }
    }
    warn!("no usable backup found, starting a fresh queue");
    Ok(QueueState::new(usize::MAX))
}

/// Resets any item left `Processing` by a crashed run back to `Pending` so
/// the scheduler picks it back up. The item's attempt counter is left
/// untouched; an interrupted run is not a failed attempt.
fn reconcile_in_flight(state: &mut QueueState) {
    let stuck: Vec<String> = state
        .items
        .iter()
        .filter(|(_, item)| item.status == QueueItemStatus::Processing)
        .map(|(id, _)| id.clone())
        .collect();
    for id in &stuck {
        if let Some(item) = state.items.get_mut(id) {
            item.status = QueueItemStatus::Pending;
            item.last_error = Some("recovered after unexpected shutdown".to_string());
        }
        if !state.processing_order.contains(id) {
            state.processing_order.push_front(id.clone());
        }
    }
    if !stuck.is_empty() {
        info!(count = stuck.len(), "reset in-flight items back to pending after restart");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{QueueItem, SourceType};
    use tempfile::tempdir;

    #[test]
    fn missing_snapshot_starts_fresh() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.json"), 3);
        let outcome = recover(&store, &ResumeOptions::default()).unwrap();
        assert!(outcome.state.items.is_empty());
        assert_eq!(outcome.items_lost, 0);
    }

    #[test]
    fn processing_items_are_reset_to_pending_on_recovery() {
        let dir = tempdir().unwrap();
        let store = SnapshotStore::new(dir.path().join("snap.json"), 3);
        let mut state = QueueState::new(10);
        state
            .add(QueueItem::new_pending("a", "A", SourceType::Initial))
            .unwrap();
        let id = state.next(chrono::Utc::now()).unwrap();
        assert_eq!(id, "a");
        store.save(&state).unwrap();

        let outcome = recover(&store, &ResumeOptions::default()).unwrap();
        assert_eq!(outcome.state.items["a"].status, QueueItemStatus::Pending);
        assert!(outcome.state.processing_order.contains(&"a".to_string()));
        assert_eq!(outcome.items_lost, 0);
    }

    #[test]
    fn falls_back_to_backup_when_allowed_and_primary_corrupted() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let store = SnapshotStore::new(&path, 3);
        let mut good_state = QueueState::new(10);
        good_state
            .add(QueueItem::new_pending("a", "A", SourceType::Initial))
            .unwrap();
        store.save(&good_state).unwrap();
        // Manually produce a backup containing the good state.
        let backup = crate::fs_util::backup_path_for(&path, "20240101T000000");
        std::fs::copy(&path, &backup).unwrap();

        // Now corrupt the primary; it still holds one item, same as the
        // backup, so nothing should be reported lost.
        let mut doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        doc["checksum"] = serde_json::Value::String("bad".into());
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let outcome = recover(&store, &ResumeOptions::default()).unwrap();
        assert_eq!(outcome.state.items.len(), 1);
        assert_eq!(outcome.items_lost, 0);
    }

    #[test]
    fn items_lost_reflects_the_gap_between_corrupted_and_restored_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let store = SnapshotStore::new(&path, 3);

        // The backup only has one item; the primary (about to be corrupted)
        // will hold three.
        let mut backup_state = QueueState::new(10);
        backup_state
            .add(QueueItem::new_pending("a", "A", SourceType::Initial))
            .unwrap();
        store.save(&backup_state).unwrap();
        let backup = crate::fs_util::backup_path_for(&path, "20240101T000000");
        std::fs::copy(&path, &backup).unwrap();

        let mut primary_state = QueueState::new(10);
        primary_state.add(QueueItem::new_pending("a", "A", SourceType::Initial)).unwrap();
        primary_state.add(QueueItem::new_pending("b", "B", SourceType::Initial)).unwrap();
        primary_state.add(QueueItem::new_pending("c", "C", SourceType::Initial)).unwrap();
        store.save(&primary_state).unwrap();
        let mut doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        doc["checksum"] = serde_json::Value::String("bad".into());
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let outcome = recover(&store, &ResumeOptions::default()).unwrap();
        assert_eq!(outcome.state.items.len(), 1);
        assert_eq!(outcome.items_lost, 2);
    }

    #[test]
    fn disabling_backup_recovery_starts_fresh_on_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("snap.json");
        let store = SnapshotStore::new(&path, 3);
        let state = QueueState::new(10);
        store.save(&state).unwrap();
        let mut doc: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        doc["checksum"] = serde_json::Value::String("bad".into());
        std::fs::write(&path, serde_json::to_vec(&doc).unwrap()).unwrap();

        let options = ResumeOptions {
            use_backup: false,
            ..ResumeOptions::default()
        };
        let outcome = recover(&store, &options).unwrap();
        assert!(outcome.state.items.is_empty());
    }
}
