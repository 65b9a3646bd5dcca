// ABOUTME: Engine-level operations: container objects, metrics and task events.
// ABOUTME: The entry point a runtime service holds for the underlying task engine.

use super::container::ContainerOps;
use super::sealed::Sealed;
use super::shared_types::{ContainerSpec, MetricsFilter, TaskEvent, TaskMetrics};
use crate::runtime::RuntimeError;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Operations on the task engine itself.
#[async_trait]
pub trait EngineOps: Sealed + Send + Sync {
    /// Short engine name for logs.
    fn name(&self) -> &'static str;

    /// Create a container object. No process is created yet.
    async fn create_container(
        &self,
        spec: &ContainerSpec,
    ) -> Result<Arc<dyn ContainerOps>, RuntimeError>;

    /// Load an existing container object by ID.
    async fn load_container(&self, id: &str) -> Result<Arc<dyn ContainerOps>, RuntimeError>;

    /// Query resource metrics for the tasks matching the filter.
    async fn metrics(&self, filter: &MetricsFilter) -> Result<Vec<TaskMetrics>, RuntimeError>;

    /// Subscribe to task lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<TaskEvent>;
}
