use std::path::PathBuf;

use crate::domain::Manifest;
use crate::error::PersistenceError;
use crate::fs_util;

/// Durable store for the manifest (the record of the previous successful
/// export). Shares the same atomic-write primitive as the queue snapshot
/// (`crate::queue::SnapshotStore`) but the manifest itself carries no
/// checksum envelope: it is read back only by the diff stage, which treats
/// a missing or unparsable manifest as "no prior export" rather than a
/// fatal error.
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        ManifestStore { path: path.into() }
    }

    pub fn save(&self, manifest: &Manifest) -> Result<(), PersistenceError> {
        let bytes = serde_json::to_vec_pretty(manifest)?;
        fs_util::atomic_write(&self.path, &bytes)
    }

    pub fn load(&self) -> Result<Manifest, PersistenceError> {
        match fs_util::read_if_exists(&self.path)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Manifest::default()),
        }
    }
}
