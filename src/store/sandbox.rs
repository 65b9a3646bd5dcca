// ABOUTME: Sandboxes containers run in, and the registry holding them.
// ABOUTME: Only the parts containers depend on: holder task and log directory.

use super::error::StoreError;
use crate::runtime::{ContainerOps, RuntimeError, TaskStatus};
use crate::types::{SandboxId, SandboxMetadata};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub metadata: SandboxMetadata,
    /// Directory container log paths are relative to.
    pub log_directory: Option<PathBuf>,
    pub labels: HashMap<String, String>,
}

pub struct Sandbox {
    pub id: SandboxId,
    pub config: SandboxConfig,
    /// Engine container running the sandbox holder task.
    pub container: Arc<dyn ContainerOps>,
}

impl Sandbox {
    /// Status of the sandbox holder task.
    pub async fn task_status(&self) -> Result<TaskStatus, RuntimeError> {
        self.container.task().await?.status().await
    }
}

#[derive(Default)]
pub struct SandboxStore {
    sandboxes: RwLock<HashMap<SandboxId, Arc<Sandbox>>>,
}

impl SandboxStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, sandbox: Arc<Sandbox>) -> Result<(), StoreError> {
        let mut sandboxes = self.sandboxes.write();
        if sandboxes.contains_key(&sandbox.id) {
            return Err(StoreError::AlreadyExists(format!("sandbox {}", sandbox.id)));
        }
        sandboxes.insert(sandbox.id.clone(), sandbox);
        Ok(())
    }

    pub fn get(&self, id: &SandboxId) -> Result<Arc<Sandbox>, StoreError> {
        self.sandboxes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotExist(format!("sandbox {id}")))
    }

    pub fn delete(&self, id: &SandboxId) {
        self.sandboxes.write().remove(id);
    }

    pub fn list(&self) -> Vec<Arc<Sandbox>> {
        self.sandboxes.read().values().cloned().collect()
    }
}
