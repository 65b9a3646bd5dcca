// ABOUTME: Remove container: engine container, checkpoint and root directory, then the records.
// ABOUTME: The removing flag blocks concurrent starts and removals and is reset on failure.

use super::RuntimeService;
use super::error::{
    CheckpointSnafu, InvalidStateSnafu, RemovingSnafu, RootDirSnafu, RuntimeSnafu, ServiceError,
};
use crate::runtime::DeleteOpts;
use crate::store::{Container, ContainerState};
use crate::types::ContainerId;
use snafu::ResultExt;

impl RuntimeService {
    /// Remove a container that is not running. Removing an unknown container
    /// succeeds.
    pub async fn remove_container(&self, id: &ContainerId) -> Result<(), ServiceError> {
        let container = match self.container(id) {
            Ok(container) => container,
            Err(e) if e.is_not_found() => {
                tracing::debug!("Remove called for container {} that does not exist", id);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        set_removing(&container).await?;
        if let Err(e) = self.remove_artifacts(&container).await {
            if let Err(reset) = reset_removing(&container).await {
                tracing::error!(
                    "Failed to reset removing state of container {}: {}",
                    id,
                    reset
                );
            }
            return Err(e);
        }

        self.containers.delete(id);
        self.names.release_by_key(id.as_str());
        tracing::info!("Removed container {}", id);
        Ok(())
    }

    async fn remove_artifacts(&self, container: &Container) -> Result<(), ServiceError> {
        let id = container.id().as_str();

        match container
            .handle()
            .delete(DeleteOpts {
                cleanup_snapshot: true,
            })
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() => {
                tracing::debug!("Engine container {} is already gone", id);
            }
            Err(e) => return Err(e).context(RuntimeSnafu { id, op: "delete" }),
        }

        container.status.delete().context(CheckpointSnafu { id })?;

        let root_dir = self.container_root_dir(container.id());
        match std::fs::remove_dir_all(&root_dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).context(RootDirSnafu {
                op: "remove",
                path: root_dir,
            }),
        }
    }
}

/// Mark the container as being removed. Fails if it is running or already
/// being removed.
async fn set_removing(container: &Container) -> Result<(), ServiceError> {
    let id = container.id().as_str();
    container
        .status
        .update(|mut status| {
            let state = status.state();
            if state == ContainerState::Running {
                let err = InvalidStateSnafu {
                    id,
                    op: "remove",
                    state,
                }
                .build();
                return (status, Err(err));
            }
            if status.removing {
                return (status, Err(RemovingSnafu { id, op: "remove" }.build()));
            }
            status.removing = true;
            (status, Ok(()))
        })
        .await
}

async fn reset_removing(container: &Container) -> Result<(), ServiceError> {
    container
        .status
        .update(|mut status| {
            status.removing = false;
            (status, Ok(()))
        })
        .await
}
