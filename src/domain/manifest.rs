use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The diff classification of a page against the prior manifest (spec.md
/// §4.4). Returned by `diff::classify_page`/`diff::diff_against_manifest`;
/// never itself persisted on a `ManifestEntry` — see
/// `ManifestProcessingStatus` for the vocabulary that is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ManifestEntryStatus {
    Added,
    Modified,
    Unchanged,
    Deleted,
}

/// The processing outcome persisted on a `ManifestEntry` (spec.md §4.8):
/// distinct from `ManifestEntryStatus`, which describes how a page compared
/// to the prior manifest, not what the scheduler actually did with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ManifestProcessingStatus {
    Exported,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub id: String,
    pub title: String,
    pub path: String,
    pub hash: String,
    pub version: u64,
    pub status: ManifestProcessingStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

/// The durable record of the previous successful export, used by the
/// incremental diff (see `crate::diff`) to decide what work a new run
/// actually needs to do.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn by_id(&self) -> HashMap<&str, &ManifestEntry> {
        self.entries.iter().map(|e| (e.id.as_str(), e)).collect()
    }

    pub fn upsert(&mut self, entry: ManifestEntry) {
        if let Some(existing) = self.entries.iter_mut().find(|e| e.id == entry.id) {
            *existing = entry;
        } else {
            self.entries.push(entry);
        }
    }
}
