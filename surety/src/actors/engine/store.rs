use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::{actors::engine::Error, engine::Snapshot};

/// Where the engine keeps its state between runs.
pub trait SnapshotStore: Send + 'static {
    fn load(&self) -> Result<Option<Snapshot>, Error>;

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), Error>;
}

/// Keeps the latest snapshot in memory only.
#[derive(Debug, Default)]
pub struct MemoryStore {
    snapshot: Option<Snapshot>,
}

impl SnapshotStore for MemoryStore {
    fn load(&self) -> Result<Option<Snapshot>, Error> {
        Ok(self.snapshot.clone())
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        self.snapshot = Some(snapshot.clone());
        Ok(())
    }
}

/// Stores the snapshot as a JSON file.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|cause| Error::IO {
                message: format!("Failed to create snapshot directory {parent:?}"),
                cause,
            })?;
            info!("Created (or checked) snapshot dir: {parent:?}");
        }
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl SnapshotStore for FileStore {
    fn load(&self) -> Result<Option<Snapshot>, Error> {
        if !self.path.exists() {
            debug!("No snapshot at {:?}", self.path);
            return Ok(None);
        }
        let data = std::fs::read(&self.path).map_err(|cause| Error::IO {
            message: format!("Failed to read snapshot file at {:?}", self.path),
            cause,
        })?;
        let snapshot = serde_json::from_slice(&data)?;
        info!("Snapshot loaded from {:?}", self.path);
        Ok(Some(snapshot))
    }

    fn save(&mut self, snapshot: &Snapshot) -> Result<(), Error> {
        let data = serde_json::to_vec_pretty(snapshot)?;
        // Write aside, then rename over the old snapshot.
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, data).map_err(|cause| Error::IO {
            message: format!("Failed to write snapshot file at {tmp:?}"),
            cause,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|cause| Error::IO {
            message: format!("Failed to move snapshot file to {:?}", self.path),
            cause,
        })?;
        debug!("Snapshot saved to {:?}", self.path);
        Ok(())
    }
}
