// ABOUTME: Container records and the concurrency-safe registry that owns them.
// ABOUTME: Metadata is fixed at creation; status changes only through StatusStorage.

use super::error::StoreError;
use super::status::StatusStorage;
use crate::io::ContainerIo;
use crate::runtime::ContainerOps;
use crate::types::{ContainerId, ContainerMetadata, ContainerName, SandboxId};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Creation-time configuration of a container. Never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub id: ContainerId,
    pub name: ContainerName,
    pub sandbox_id: SandboxId,
    /// Orchestrator-facing name and attempt.
    pub container: ContainerMetadata,
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Absolute path of the container's log file, if it logs.
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default)]
    pub tty: bool,
    #[serde(default)]
    pub stdin: bool,
    #[serde(default)]
    pub stdin_once: bool,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

/// A container known to the shim.
pub struct Container {
    pub metadata: Metadata,
    pub status: StatusStorage,
    handle: Arc<dyn ContainerOps>,
    io: Mutex<Option<Arc<ContainerIo>>>,
}

impl Container {
    pub fn new(metadata: Metadata, status: StatusStorage, handle: Arc<dyn ContainerOps>) -> Self {
        Self {
            metadata,
            status,
            handle,
            io: Mutex::new(None),
        }
    }

    pub fn id(&self) -> &ContainerId {
        &self.metadata.id
    }

    pub fn name(&self) -> &ContainerName {
        &self.metadata.name
    }

    /// Engine container object backing this container.
    pub fn handle(&self) -> &Arc<dyn ContainerOps> {
        &self.handle
    }

    /// I/O wiring of the current task, if one was ever created.
    pub fn io(&self) -> Option<Arc<ContainerIo>> {
        self.io.lock().clone()
    }

    /// Replace the I/O wiring for a new task incarnation.
    pub fn set_io(&self, io: Arc<ContainerIo>) {
        *self.io.lock() = Some(io);
    }
}

/// Registry of containers by ID.
#[derive(Default)]
pub struct ContainerStore {
    containers: RwLock<HashMap<ContainerId, Arc<Container>>>,
}

impl ContainerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, container: Arc<Container>) -> Result<(), StoreError> {
        let mut containers = self.containers.write();
        if containers.contains_key(container.id()) {
            return Err(StoreError::AlreadyExists(format!(
                "container {}",
                container.id()
            )));
        }
        containers.insert(container.id().clone(), container);
        Ok(())
    }

    pub fn get(&self, id: &ContainerId) -> Result<Arc<Container>, StoreError> {
        self.containers
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotExist(format!("container {id}")))
    }

    /// Remove a container. Unknown IDs are ignored.
    pub fn delete(&self, id: &ContainerId) {
        self.containers.write().remove(id);
    }

    pub fn list(&self) -> Vec<Arc<Container>> {
        self.containers.read().values().cloned().collect()
    }
}
