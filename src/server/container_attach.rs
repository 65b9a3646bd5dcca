// ABOUTME: Attach: negotiate a streaming endpoint, then run the session against live I/O.
// ABOUTME: Resize events are forwarded in the background; failures there are only logged.

use super::error::{InvalidStateSnafu, IoSnafu, RuntimeSnafu, ServiceError, StreamSnafu};
use super::{AttachRequest, RuntimeService, TerminalSize};
use crate::io::{AttachOptions, CloseStdinFn, IoError};
use crate::runtime::{CloseIoOpts, IoReader, IoWriter, TaskOps};
use crate::store::{Container, ContainerState};
use crate::stream::AttachResponse;
use crate::types::ContainerId;
use snafu::{ResultExt, ensure};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Client side streams of an attach session.
#[derive(Default)]
pub struct AttachStreams {
    pub stdin: Option<IoReader>,
    pub stdout: Option<IoWriter>,
    pub stderr: Option<IoWriter>,
    pub tty: bool,
    /// Window size changes from the client. The forwarder stops when the
    /// sender is dropped.
    pub resize: Option<mpsc::Receiver<TerminalSize>>,
}

impl RuntimeService {
    /// Check that the container is running and allocate a streaming endpoint
    /// for the session.
    pub fn attach(&self, request: &AttachRequest) -> Result<AttachResponse, ServiceError> {
        let container = self.container(&request.container_id)?;
        ensure_running(&container)?;
        self.streams
            .get_attach(request)
            .context(StreamSnafu {
                id: container.id().as_str(),
            })
    }

    /// Run an attach session until its output ends.
    pub async fn attach_container(
        &self,
        id: &ContainerId,
        streams: AttachStreams,
    ) -> Result<(), ServiceError> {
        let container = self.container(id)?;
        // The container may have exited since the endpoint was negotiated.
        ensure_running(&container)?;

        let task = container
            .handle()
            .task()
            .await
            .context(RuntimeSnafu {
                id: id.as_str(),
                op: "load task of",
            })?;
        let io = container
            .io()
            .ok_or_else(|| IoError::Closed(id.to_string()))
            .context(IoSnafu { id: id.as_str() })?;

        if let Some(sizes) = streams.resize {
            forward_resizes(id.clone(), Arc::clone(&task), sizes);
        }

        let close_task = Arc::clone(&task);
        let close_stdin: CloseStdinFn = Box::new(move || {
            Box::pin(async move { close_task.close_io(CloseIoOpts { stdin: true }).await })
        });
        io.attach(AttachOptions {
            stdin: streams.stdin,
            stdout: streams.stdout,
            stderr: streams.stderr,
            tty: streams.tty,
            stdin_once: container.metadata.stdin_once,
            close_stdin: Some(close_stdin),
        })
        .await
        .context(IoSnafu { id: id.as_str() })
    }
}

fn ensure_running(container: &Container) -> Result<(), ServiceError> {
    let state = container.status.get().state();
    ensure!(
        state == ContainerState::Running,
        InvalidStateSnafu {
            id: container.id().as_str(),
            op: "attach to",
            state,
        }
    );
    Ok(())
}

fn forward_resizes(
    id: ContainerId,
    task: Arc<dyn TaskOps>,
    mut sizes: mpsc::Receiver<TerminalSize>,
) {
    tokio::spawn(async move {
        while let Some(size) = sizes.recv().await {
            if let Err(e) = task
                .resize(u32::from(size.width), u32::from(size.height))
                .await
            {
                tracing::error!("Failed to resize console of container {}: {}", id, e);
            }
        }
    });
}
