// ABOUTME: On-disk checkpoints of container metadata and status.
// ABOUTME: Versioned JSON documents replaced atomically via temp file and rename.

use super::container::Metadata;
use super::status::Status;
use crate::types::ContainerId;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

/// Version tag written into every checkpoint document.
pub const CHECKPOINT_VERSION: &str = "v1";

const CONTAINERS_DIR: &str = "containers";
const METADATA_FILE: &str = "metadata.json";
const STATUS_FILE: &str = "status.json";

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed checkpoint: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported checkpoint version {0:?}")]
    Version(String),
}

#[derive(Serialize)]
struct VersionedRef<'a, T> {
    version: &'static str,
    #[serde(flatten)]
    data: &'a T,
}

#[derive(Deserialize)]
struct Versioned<T> {
    version: String,
    #[serde(flatten)]
    data: T,
}

/// Checkpoint directory of one container: `<state_dir>/containers/<id>/`.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    dir: PathBuf,
}

impl Checkpoint {
    pub fn new(state_dir: &Path, id: &ContainerId) -> Self {
        Self {
            dir: state_dir.join(CONTAINERS_DIR).join(id.as_str()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the checkpoint directory.
    pub fn create(&self) -> Result<(), CheckpointError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    pub fn write_metadata(&self, metadata: &Metadata) -> Result<(), CheckpointError> {
        self.write(METADATA_FILE, metadata)
    }

    pub fn write_status(&self, status: &Status) -> Result<(), CheckpointError> {
        self.write(STATUS_FILE, status)
    }

    pub fn read_metadata(&self) -> Result<Metadata, CheckpointError> {
        self.read(METADATA_FILE)
    }

    pub fn read_status(&self) -> Result<Status, CheckpointError> {
        self.read(STATUS_FILE)
    }

    /// Remove the checkpoint directory. A missing directory is not an error.
    pub fn delete(&self) -> Result<(), CheckpointError> {
        match fs::remove_dir_all(&self.dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn write<T: Serialize>(&self, file: &str, value: &T) -> Result<(), CheckpointError> {
        let json = serde_json::to_vec_pretty(&VersionedRef {
            version: CHECKPOINT_VERSION,
            data: value,
        })?;
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(&json)?;
        tmp.as_file().sync_all()?;
        tmp.persist(self.dir.join(file))
            .map_err(|e| CheckpointError::Io(e.error))?;
        Ok(())
    }

    fn read<T: DeserializeOwned>(&self, file: &str) -> Result<T, CheckpointError> {
        let bytes = fs::read(self.dir.join(file))?;
        let doc: Versioned<T> = serde_json::from_slice(&bytes)?;
        if doc.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::Version(doc.version));
        }
        Ok(doc.data)
    }
}

/// A container checkpoint read back from disk.
#[derive(Debug)]
pub struct LoadedCheckpoint {
    pub checkpoint: Checkpoint,
    pub metadata: Metadata,
    pub status: Status,
}

/// Read every container checkpoint under `state_dir`.
///
/// Each entry is returned with its own result so one unreadable checkpoint
/// does not hide the others.
pub fn load_all(
    state_dir: &Path,
) -> Result<Vec<(PathBuf, Result<LoadedCheckpoint, CheckpointError>)>, CheckpointError> {
    let root = state_dir.join(CONTAINERS_DIR);
    let entries = match fs::read_dir(&root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut loaded = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let path = entry.path();
        let checkpoint = Checkpoint { dir: path.clone() };
        let result = checkpoint.read_metadata().and_then(|metadata| {
            let status = checkpoint.read_status()?;
            Ok(LoadedCheckpoint {
                checkpoint: checkpoint.clone(),
                metadata,
                status,
            })
        });
        loaded.push((path, result));
    }
    loaded.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint_in(dir: &Path) -> Checkpoint {
        let cp = Checkpoint::new(dir, &ContainerId::new("c1"));
        cp.create().unwrap();
        cp
    }

    #[test]
    fn status_document_is_versioned() {
        let dir = tempfile::tempdir().unwrap();
        let cp = checkpoint_in(dir.path());
        let status = Status {
            pid: 42,
            created_at: 1,
            ..Default::default()
        };
        cp.write_status(&status).unwrap();

        let raw: serde_json::Value =
            serde_json::from_slice(&fs::read(cp.dir().join(STATUS_FILE)).unwrap()).unwrap();
        assert_eq!(raw["version"], "v1");
        assert_eq!(raw["pid"], 42);
        assert_eq!(cp.read_status().unwrap(), status);
    }

    #[test]
    fn rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let cp = checkpoint_in(dir.path());
        fs::write(cp.dir().join(STATUS_FILE), r#"{"version":"v9","pid":1}"#).unwrap();
        assert!(matches!(
            cp.read_status(),
            Err(CheckpointError::Version(v)) if v == "v9"
        ));
    }

    #[test]
    fn delete_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let cp = checkpoint_in(dir.path());
        cp.write_status(&Status::default()).unwrap();
        cp.delete().unwrap();
        cp.delete().unwrap();
        assert!(!cp.dir().exists());
    }

    #[test]
    fn write_does_not_recreate_deleted_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cp = checkpoint_in(dir.path());
        cp.delete().unwrap();
        assert!(matches!(
            cp.write_status(&Status::default()),
            Err(CheckpointError::Io(_))
        ));
        assert!(!cp.dir().exists());
    }

    #[test]
    fn load_all_tolerates_missing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_all(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn load_all_reports_broken_entries_individually() {
        let dir = tempfile::tempdir().unwrap();
        let cp = checkpoint_in(dir.path());
        cp.write_status(&Status::default()).unwrap();

        let loaded = load_all(dir.path()).unwrap();
        assert_eq!(loaded.len(), 1);
        // No metadata document was written.
        assert!(loaded[0].1.is_err());
    }
}
