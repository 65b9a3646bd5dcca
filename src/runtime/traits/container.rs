// ABOUTME: Container object operations for the task engine.
// ABOUTME: Create and load tasks, and delete the container object itself.

use super::sealed::Sealed;
use super::shared_types::{DeleteOpts, TaskIo};
use super::task::TaskOps;
use crate::runtime::RuntimeError;
use async_trait::async_trait;
use std::sync::Arc;

/// An engine-side container object.
#[async_trait]
pub trait ContainerOps: Sealed + Send + Sync {
    /// Engine ID of the container.
    fn id(&self) -> &str;

    /// Create a task bound to the given I/O. The process is not started.
    async fn new_task(&self, io: TaskIo) -> Result<Arc<dyn TaskOps>, RuntimeError>;

    /// Load the current task. `NotFound` if no task exists.
    async fn task(&self) -> Result<Arc<dyn TaskOps>, RuntimeError>;

    /// Delete the container object.
    async fn delete(&self, opts: DeleteOpts) -> Result<(), RuntimeError>;
}
