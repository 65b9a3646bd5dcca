// ABOUTME: Task operations for the task engine.
// ABOUTME: A task is the running process behind a container.

use super::sealed::Sealed;
use super::shared_types::{CloseIoOpts, ExitStatus, TaskDeleteOpts, TaskStatus};
use crate::runtime::RuntimeError;
use async_trait::async_trait;

/// Process-level operations on a task.
#[async_trait]
pub trait TaskOps: Sealed + Send + Sync {
    /// ID of the container owning this task.
    fn id(&self) -> &str;

    /// Process ID, 0 until the process exists.
    fn pid(&self) -> u32;

    /// Start the task's process.
    async fn start(&self) -> Result<(), RuntimeError>;

    /// Current task status.
    async fn status(&self) -> Result<TaskStatus, RuntimeError>;

    /// Resize the task's console.
    async fn resize(&self, width: u32, height: u32) -> Result<(), RuntimeError>;

    /// Close the task's I/O (stdin).
    async fn close_io(&self, opts: CloseIoOpts) -> Result<(), RuntimeError>;

    /// Delete the task, killing the process first when requested.
    async fn delete(&self, opts: TaskDeleteOpts) -> Result<ExitStatus, RuntimeError>;
}
