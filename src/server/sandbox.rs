// ABOUTME: Minimal sandbox lifecycle: a holder task containers run beside.
// ABOUTME: No network namespace; the holder only has to be running.

use super::RuntimeService;
use super::error::{RuntimeSnafu, SandboxNotFoundSnafu, ServiceError, StoreSnafu};
use crate::runtime::{ContainerSpec, DeleteOpts, TaskDeleteOpts, TaskIo};
use crate::store::{Sandbox, SandboxConfig};
use crate::types::SandboxId;
use snafu::ResultExt;
use std::sync::Arc;

impl RuntimeService {
    /// Create a sandbox and start its holder task.
    pub async fn run_sandbox(&self, config: SandboxConfig) -> Result<SandboxId, ServiceError> {
        let id = SandboxId::generate();
        let spec = ContainerSpec {
            id: id.to_string(),
            labels: config.labels.clone(),
            ..Default::default()
        };
        let container = self
            .engine
            .create_container(&spec)
            .await
            .context(RuntimeSnafu {
                id: id.as_str(),
                op: "create sandbox",
            })?;

        let started = async {
            let task = container
                .new_task(TaskIo {
                    stdin: None,
                    stdout: Box::new(tokio::io::sink()),
                    stderr: Box::new(tokio::io::sink()),
                    terminal: false,
                })
                .await?;
            task.start().await
        };
        if let Err(e) = started.await {
            if let Err(cleanup) = container.delete(DeleteOpts::default()).await {
                tracing::error!("Failed to delete sandbox container {}: {}", id, cleanup);
            }
            return Err(e).context(RuntimeSnafu {
                id: id.as_str(),
                op: "start sandbox",
            });
        }

        self.sandboxes
            .add(Arc::new(Sandbox {
                id: id.clone(),
                config,
                container,
            }))
            .context(StoreSnafu { id: id.as_str() })?;
        tracing::info!("Sandbox {} is running", id);
        Ok(id)
    }

    /// Stop the sandbox holder and forget the sandbox.
    pub async fn remove_sandbox(&self, id: &SandboxId) -> Result<(), ServiceError> {
        let sandbox = self
            .sandboxes
            .get(id)
            .context(SandboxNotFoundSnafu { id: id.as_str() })?;
        match sandbox.container.task().await {
            Ok(task) => {
                if let Err(e) = task.delete(TaskDeleteOpts { kill: true }).await
                    && !e.is_not_found()
                {
                    return Err(e).context(RuntimeSnafu {
                        id: id.as_str(),
                        op: "stop sandbox",
                    });
                }
            }
            Err(e) if e.is_not_found() => {}
            Err(e) => {
                return Err(e).context(RuntimeSnafu {
                    id: id.as_str(),
                    op: "stop sandbox",
                });
            }
        }
        if let Err(e) = sandbox.container.delete(DeleteOpts::default()).await
            && !e.is_not_found()
        {
            return Err(e).context(RuntimeSnafu {
                id: id.as_str(),
                op: "remove sandbox",
            });
        }
        self.sandboxes.delete(id);
        tracing::info!("Removed sandbox {}", id);
        Ok(())
    }
}
