// ABOUTME: Create container: reserve the name, create the engine container, checkpoint.
// ABOUTME: Every step is undone if a later one fails.

use super::error::{
    CheckpointSnafu, InvalidNameSnafu, NameReservedSnafu, RootDirSnafu, RuntimeSnafu,
    SandboxNotFoundSnafu, ServiceError, StoreSnafu,
};
use super::{ContainerConfig, RuntimeService};
use crate::runtime::{ContainerOps, ContainerSpec, DeleteOpts};
use crate::store::{Checkpoint, Container, Metadata, NameIndex, Status, StatusStorage, unix_nanos};
use crate::types::{ContainerId, ContainerName, SandboxId};
use snafu::ResultExt;
use std::path::Path;
use std::sync::Arc;

/// Name reservation released on drop unless committed.
struct Reservation<'a> {
    names: &'a NameIndex,
    name: String,
    committed: bool,
}

impl Reservation<'_> {
    fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.names.release_by_name(&self.name);
        }
    }
}

impl RuntimeService {
    /// Create a container in `sandbox_id`. It starts out in the created state.
    pub async fn create_container(
        &self,
        sandbox_id: &SandboxId,
        config: ContainerConfig,
    ) -> Result<ContainerId, ServiceError> {
        let sandbox = self
            .sandboxes
            .get(sandbox_id)
            .context(SandboxNotFoundSnafu {
                id: sandbox_id.as_str(),
            })?;
        let id = ContainerId::generate();
        let name = ContainerName::from_metadata(&config.metadata, &sandbox.config.metadata)
            .context(InvalidNameSnafu)?;

        self.names
            .reserve(name.as_str(), id.as_str())
            .context(NameReservedSnafu {
                name: name.as_str(),
            })?;
        let reservation = Reservation {
            names: &self.names,
            name: name.to_string(),
            committed: false,
        };

        let log_path = match (&sandbox.config.log_directory, &config.log_path) {
            (Some(dir), Some(path)) => Some(dir.join(path)),
            (None, Some(path)) if path.is_absolute() => Some(path.clone()),
            (None, Some(path)) => {
                tracing::warn!(
                    "Ignoring relative log path {} of container {}: sandbox has no log directory",
                    path.display(),
                    id
                );
                None
            }
            (_, None) => None,
        };

        let mut command = config.command.clone();
        command.extend(config.args.iter().cloned());
        let metadata = Metadata {
            id: id.clone(),
            name: name.clone(),
            sandbox_id: sandbox_id.clone(),
            container: config.metadata,
            image: config.image,
            command: command.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            log_path,
            tty: config.tty,
            stdin: config.stdin,
            stdin_once: config.stdin_once,
            labels: config.labels.clone(),
            annotations: config.annotations,
        };

        let spec = ContainerSpec {
            id: id.to_string(),
            command,
            env: config.env,
            working_dir: config.working_dir,
            labels: config.labels,
        };
        let handle = self
            .engine
            .create_container(&spec)
            .await
            .context(RuntimeSnafu {
                id: id.as_str(),
                op: "create",
            })?;

        let status = Status {
            created_at: unix_nanos(),
            ..Default::default()
        };
        let checkpoint = Checkpoint::new(&self.config.state_dir, &id);
        let root_dir = self.container_root_dir(&id);
        if let Err(e) = persist_new(&checkpoint, &root_dir, &metadata, &status) {
            self.undo_create(&id, &handle, &checkpoint, &root_dir).await;
            return Err(e);
        }

        let container = Container::new(
            metadata,
            StatusStorage::new(checkpoint.clone(), status),
            Arc::clone(&handle),
        );
        if let Err(e) = self.containers.add(Arc::new(container)) {
            self.undo_create(&id, &handle, &checkpoint, &root_dir).await;
            return Err(e).context(StoreSnafu { id: id.as_str() });
        }

        reservation.commit();
        tracing::info!("Created container {} ({})", id, name);
        Ok(id)
    }

    async fn undo_create(
        &self,
        id: &ContainerId,
        handle: &Arc<dyn ContainerOps>,
        checkpoint: &Checkpoint,
        root_dir: &Path,
    ) {
        if let Err(e) = handle.delete(DeleteOpts::default()).await {
            tracing::error!("Failed to delete engine container {}: {}", id, e);
        }
        if let Err(e) = checkpoint.delete() {
            tracing::error!("Failed to delete checkpoint of container {}: {}", id, e);
        }
        if let Err(e) = std::fs::remove_dir_all(root_dir)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            tracing::error!(
                "Failed to remove root directory {}: {}",
                root_dir.display(),
                e
            );
        }
    }
}

fn persist_new(
    checkpoint: &Checkpoint,
    root_dir: &Path,
    metadata: &Metadata,
    status: &Status,
) -> Result<(), ServiceError> {
    let id = metadata.id.as_str();
    checkpoint
        .create()
        .and_then(|()| checkpoint.write_metadata(metadata))
        .and_then(|()| checkpoint.write_status(status))
        .context(CheckpointSnafu { id })?;
    std::fs::create_dir_all(root_dir).context(RootDirSnafu {
        op: "create",
        path: root_dir,
    })?;
    Ok(())
}
