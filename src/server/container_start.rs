// ABOUTME: Start container: wire I/O, create and start the task inside one status transaction.
// ABOUTME: A failed start is recorded as an exit with reason StartError.

use super::RuntimeService;
use super::error::{
    InvalidStateSnafu, IoSnafu, RemovingSnafu, RuntimeSnafu, SandboxNotFoundSnafu,
    SandboxNotRunningSnafu, ServiceError,
};
use crate::io::{ContainerIo, IoError, IoGuard, IoOptions};
use crate::runtime::{TaskDeleteOpts, TaskStatus};
use crate::store::{
    Container, ContainerState, REASON_START_ERROR, START_ERROR_EXIT_CODE, Status, unix_nanos,
};
use crate::types::ContainerId;
use snafu::{ResultExt, ensure};
use std::sync::Arc;

impl RuntimeService {
    /// Start a created container.
    ///
    /// The container stays locked for the whole start, so an exit event or a
    /// concurrent start or removal is applied only after it.
    pub async fn start_container(&self, id: &ContainerId) -> Result<(), ServiceError> {
        let container = self.container(id)?;
        tracing::debug!("Starting container {}", id);
        container
            .status
            .update_async(|status| self.start_in_transaction(&container, status))
            .await?;
        tracing::info!(
            "Started container {} (pid {})",
            id,
            container.status.get().pid
        );
        Ok(())
    }

    async fn start_in_transaction(
        &self,
        container: &Container,
        mut status: Status,
    ) -> (Status, Result<(), ServiceError>) {
        let id = container.id().as_str();
        let state = status.state();
        if state != ContainerState::Created {
            let err = InvalidStateSnafu {
                id,
                op: "start",
                state,
            }
            .build();
            return (status, Err(err));
        }
        if status.removing {
            return (status, Err(RemovingSnafu { id, op: "start" }.build()));
        }

        match self.start_task(container).await {
            Ok(pid) => {
                status.pid = pid;
                status.started_at = unix_nanos();
                (status, Ok(()))
            }
            Err(e) => {
                status.pid = 0;
                status.finished_at = unix_nanos();
                status.exit_code = START_ERROR_EXIT_CODE;
                status.reason = REASON_START_ERROR.to_string();
                status.message = e.to_string();
                (status, Err(e))
            }
        }
    }

    /// Create and start the task. Returns its pid.
    async fn start_task(&self, container: &Container) -> Result<u32, ServiceError> {
        let meta = &container.metadata;
        let id = meta.id.as_str();

        let sandbox = self
            .sandboxes
            .get(&meta.sandbox_id)
            .context(SandboxNotFoundSnafu {
                id: meta.sandbox_id.as_str(),
            })?;
        // Not authoritative: the sandbox can still exit before the task starts,
        // in which case starting the task fails.
        let sandbox_status = sandbox.task_status().await.context(RuntimeSnafu {
            id,
            op: "inspect sandbox of",
        })?;
        ensure!(
            sandbox_status == TaskStatus::Running,
            SandboxNotRunningSnafu {
                id,
                op: "start",
                sandbox_id: meta.sandbox_id.as_str(),
            }
        );

        let io = ContainerIo::new(
            &meta.id,
            IoOptions {
                stdin: meta.stdin,
                tty: meta.tty,
                log_path: meta.log_path.clone(),
            },
        )
        .await
        .context(IoSnafu { id })?;
        let io = Arc::new(io);
        // Closes the pipe read ends on every error path below.
        let guard = IoGuard::new(Arc::clone(&io));

        let task_io = io
            .take_task_io()
            .ok_or_else(|| IoError::Closed(id.to_string()))
            .context(IoSnafu { id })?;
        let task = container
            .handle()
            .new_task(task_io)
            .await
            .context(RuntimeSnafu {
                id,
                op: "create task for",
            })?;

        if let Err(e) = task.start().await {
            if let Err(cleanup) = task.delete(TaskDeleteOpts { kill: true }).await {
                tracing::error!("Failed to delete task of container {}: {}", id, cleanup);
            }
            return Err(e).context(RuntimeSnafu { id, op: "start" });
        }

        if let Some(io) = guard.disarm() {
            container.set_io(io);
        }
        Ok(task.pid())
    }
}
