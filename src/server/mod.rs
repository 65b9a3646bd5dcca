// ABOUTME: Lifecycle coordinator driving containers through the task engine.
// ABOUTME: Owns the stores and the name index; status changes run as transactions.

mod container_attach;
mod container_create;
mod container_remove;
mod container_start;
mod container_stats;
mod container_status;
mod error;
mod events;
mod recover;
mod sandbox;
mod types;

pub use container_attach::AttachStreams;
pub use error::{ServiceError, ServiceErrorKind};
pub use events::EventMonitor;
pub use recover::RecoveryReport;
pub use types::{
    AttachRequest, ContainerAttributes, ContainerConfig, ContainerFilter, ContainerStats,
    ContainerStatusView, CpuUsage, MemoryUsage, TerminalSize,
};

use crate::runtime::EngineOps;
use crate::store::{Container, ContainerStore, NameIndex, SandboxStore};
use crate::stream::StreamServer;
use crate::types::ContainerId;
use error::ContainerNotFoundSnafu;
use snafu::ResultExt;
use std::path::PathBuf;
use std::sync::Arc;

const CONTAINERS_DIR: &str = "containers";

/// Directories the service keeps container state in.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Root of per-container directories.
    pub root_dir: PathBuf,
    /// Root of checkpoints.
    pub state_dir: PathBuf,
}

/// Implements the container lifecycle on top of a task engine.
#[derive(Clone)]
pub struct RuntimeService {
    config: ServiceConfig,
    engine: Arc<dyn EngineOps>,
    streams: Arc<dyn StreamServer>,
    containers: Arc<ContainerStore>,
    names: Arc<NameIndex>,
    sandboxes: Arc<SandboxStore>,
}

impl RuntimeService {
    pub fn new(
        config: ServiceConfig,
        engine: Arc<dyn EngineOps>,
        streams: Arc<dyn StreamServer>,
    ) -> Self {
        Self {
            config,
            engine,
            streams,
            containers: Arc::new(ContainerStore::new()),
            names: Arc::new(NameIndex::new()),
            sandboxes: Arc::new(SandboxStore::new()),
        }
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn EngineOps> {
        &self.engine
    }

    pub fn containers(&self) -> &ContainerStore {
        &self.containers
    }

    pub fn names(&self) -> &NameIndex {
        &self.names
    }

    pub fn sandboxes(&self) -> &SandboxStore {
        &self.sandboxes
    }

    /// Directory holding a container's runtime files.
    pub fn container_root_dir(&self, id: &ContainerId) -> PathBuf {
        self.config.root_dir.join(CONTAINERS_DIR).join(id.as_str())
    }

    fn container(&self, id: &ContainerId) -> Result<Arc<Container>, ServiceError> {
        self.containers
            .get(id)
            .context(ContainerNotFoundSnafu { id: id.as_str() })
    }
}
