// ABOUTME: Rebuild the container registry from checkpoints after a restart.
// ABOUTME: Containers whose task is gone are recorded as exited for an unknown reason.

use super::RuntimeService;
use super::error::{
    CheckpointSnafu, LoadCheckpointsSnafu, NameReservedSnafu, RuntimeSnafu, ServiceError,
    StoreSnafu,
};
use crate::runtime::{ContainerOps, ContainerSpec, TaskDeleteOpts, TaskStatus};
use crate::store::{
    Container, ContainerState, LoadedCheckpoint, Metadata, REASON_UNKNOWN, Status,
    StatusStorage, UNKNOWN_EXIT_CODE, load_all, unix_nanos,
};
use crate::types::ContainerId;
use snafu::ResultExt;
use std::path::PathBuf;
use std::sync::Arc;

/// Outcome of [`RuntimeService::recover`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovered: Vec<ContainerId>,
    /// Checkpoint directories that could not be restored.
    pub skipped: Vec<PathBuf>,
}

impl RuntimeService {
    /// Load every checkpointed container into the registry.
    pub async fn recover(&self) -> Result<RecoveryReport, ServiceError> {
        let entries = load_all(&self.config.state_dir).context(LoadCheckpointsSnafu {
            path: self.config.state_dir.as_path(),
        })?;

        let mut report = RecoveryReport::default();
        for (path, loaded) in entries {
            let restored = match loaded {
                Ok(loaded) => self.recover_container(loaded).await,
                Err(e) => {
                    tracing::warn!("Skipping unreadable checkpoint {}: {}", path.display(), e);
                    report.skipped.push(path);
                    continue;
                }
            };
            match restored {
                Ok(id) => report.recovered.push(id),
                Err(e) => {
                    tracing::warn!("Failed to recover container from {}: {}", path.display(), e);
                    report.skipped.push(path);
                }
            }
        }
        tracing::info!(
            "Recovered {} containers, skipped {}",
            report.recovered.len(),
            report.skipped.len()
        );
        Ok(report)
    }

    async fn recover_container(
        &self,
        loaded: LoadedCheckpoint,
    ) -> Result<ContainerId, ServiceError> {
        let LoadedCheckpoint {
            checkpoint,
            metadata,
            status,
        } = loaded;
        let id = metadata.id.clone();

        let (handle, status) = match self.engine.load_container(id.as_str()).await {
            Ok(handle) => {
                let status = reconcile(&id, &handle, status).await;
                (handle, status)
            }
            Err(e) if e.is_not_found() => {
                // Recreate the engine object so the container can still be removed.
                let handle = self
                    .engine
                    .create_container(&spec_of(&metadata))
                    .await
                    .context(RuntimeSnafu {
                        id: id.as_str(),
                        op: "recreate",
                    })?;
                let status = if status.state() == ContainerState::Exited {
                    status
                } else {
                    mark_unknown_exit(status)
                };
                (handle, status)
            }
            Err(e) => {
                return Err(e).context(RuntimeSnafu {
                    id: id.as_str(),
                    op: "load",
                });
            }
        };

        checkpoint
            .write_status(&status)
            .context(CheckpointSnafu { id: id.as_str() })?;
        self.names
            .reserve(metadata.name.as_str(), id.as_str())
            .context(NameReservedSnafu {
                name: metadata.name.as_str(),
            })?;
        let container = Container::new(metadata, StatusStorage::new(checkpoint, status), handle);
        if let Err(e) = self.containers.add(Arc::new(container)) {
            self.names.release_by_key(id.as_str());
            return Err(e).context(StoreSnafu { id: id.as_str() });
        }
        tracing::debug!("Recovered container {}", id);
        Ok(id)
    }
}

/// Bring a checkpointed status in line with the engine's task.
async fn reconcile(id: &ContainerId, handle: &Arc<dyn ContainerOps>, status: Status) -> Status {
    if status.state() != ContainerState::Running {
        return status;
    }
    let task = match handle.task().await {
        Ok(task) => task,
        Err(e) => {
            if !e.is_not_found() {
                tracing::warn!("Failed to load task of container {}: {}", id, e);
            }
            return mark_unknown_exit(status);
        }
    };
    match task.status().await {
        Ok(TaskStatus::Running) | Ok(TaskStatus::Paused) => status,
        Ok(_) => match task.delete(TaskDeleteOpts::default()).await {
            Ok(exit) => {
                let mut status = status;
                status.pid = 0;
                status.finished_at = exit.exited_at.timestamp_nanos_opt().unwrap_or(i64::MAX);
                status.exit_code = exit.code;
                status
            }
            Err(e) => {
                tracing::warn!("Failed to delete stopped task of container {}: {}", id, e);
                mark_unknown_exit(status)
            }
        },
        Err(e) => {
            tracing::warn!("Failed to get task status of container {}: {}", id, e);
            mark_unknown_exit(status)
        }
    }
}

fn mark_unknown_exit(mut status: Status) -> Status {
    status.pid = 0;
    status.finished_at = unix_nanos();
    status.exit_code = UNKNOWN_EXIT_CODE;
    status.reason = REASON_UNKNOWN.to_string();
    status
}

fn spec_of(metadata: &Metadata) -> ContainerSpec {
    ContainerSpec {
        id: metadata.id.to_string(),
        command: metadata.command.clone(),
        env: metadata.env.clone(),
        working_dir: metadata.working_dir.clone(),
        labels: metadata.labels.clone(),
    }
}
