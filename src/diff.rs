use std::collections::HashMap;

use crate::domain::{Manifest, ManifestEntry, ManifestEntryStatus};

/// One remote page as seen during the current run's discovery pass, enough
/// to compare against a prior manifest entry.
#[derive(Debug, Clone)]
pub struct RemotePageRef {
    pub id: String,
    pub version: u64,
    pub hash: Option<String>,
}

/// Decision rule for a single page against the prior manifest, in order:
///
/// 1. `force_full` set: `Modified` (full re-export).
/// 2. Not present in the prior manifest: `Added`.
/// 3. Present, but version or hash differs: `Modified`.
/// 4. Present, version and hash both match: `Unchanged`.
///
/// This is the per-page rule the scheduler applies as each page completes;
/// `diff_against_manifest` applies it across a whole snapshot at once.
pub fn classify_page(
    page: &RemotePageRef,
    prior_by_id: &HashMap<&str, &ManifestEntry>,
    force_full: bool,
) -> ManifestEntryStatus {
    if force_full {
        return ManifestEntryStatus::Modified;
    }
    match prior_by_id.get(page.id.as_str()) {
        None => ManifestEntryStatus::Added,
        Some(entry) => {
            let version_differs = entry.version != page.version;
            let hash_differs = page
                .hash
                .as_deref()
                .map(|h| h != entry.hash)
                .unwrap_or(false);
            if version_differs || hash_differs {
                ManifestEntryStatus::Modified
            } else {
                ManifestEntryStatus::Unchanged
            }
        }
    }
}

/// Classifies every page the current run knows about against the prior
/// manifest via `classify_page`. Afterwards, any manifest entry whose id is
/// absent from `remote_pages` is reported as `Deleted`. Deleted entries are
/// reported only; nothing here removes them from the manifest or the
/// filesystem (see design decision in `DESIGN.md`).
pub fn diff_against_manifest(
    remote_pages: &[RemotePageRef],
    prior: &Manifest,
    force_full: bool,
) -> Vec<(String, ManifestEntryStatus)> {
    let prior_by_id = prior.by_id();
    let mut results = Vec::with_capacity(remote_pages.len());

    for page in remote_pages {
        let status = classify_page(page, &prior_by_id, force_full);
        results.push((page.id.clone(), status));
    }

    let remote_ids: std::collections::HashSet<&str> =
        remote_pages.iter().map(|p| p.id.as_str()).collect();
    for entry in &prior.entries {
        if !remote_ids.contains(entry.id.as_str()) {
            results.push((entry.id.clone(), ManifestEntryStatus::Deleted));
        }
    }

    results
}
