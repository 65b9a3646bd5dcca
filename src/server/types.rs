// ABOUTME: Request and response shapes of the lifecycle operations.
// ABOUTME: Views are derived from status and metadata; nothing here mutates a container.

use crate::store::{Container, ContainerState, REASON_COMPLETED, REASON_ERROR};
use crate::types::{ContainerId, ContainerMetadata, SandboxId};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Configuration of a container to create.
#[derive(Debug, Clone, Default)]
pub struct ContainerConfig {
    pub metadata: ContainerMetadata,
    pub image: String,
    pub command: Vec<String>,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub working_dir: Option<PathBuf>,
    /// Log path relative to the sandbox log directory.
    pub log_path: Option<PathBuf>,
    pub tty: bool,
    pub stdin: bool,
    pub stdin_once: bool,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

/// Read-only view of one container's status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStatusView {
    pub id: ContainerId,
    pub sandbox_id: SandboxId,
    pub metadata: ContainerMetadata,
    pub image: String,
    pub state: ContainerState,
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub exit_code: i32,
    pub reason: String,
    pub message: String,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
    pub log_path: Option<PathBuf>,
}

impl ContainerStatusView {
    pub(crate) fn of(container: &Container) -> Self {
        let meta = &container.metadata;
        let status = container.status.get();
        let state = status.state();
        let mut reason = status.reason.clone();
        if state == ContainerState::Exited && reason.is_empty() {
            reason = if status.exit_code == 0 {
                REASON_COMPLETED
            } else {
                REASON_ERROR
            }
            .to_string();
        }
        Self {
            id: meta.id.clone(),
            sandbox_id: meta.sandbox_id.clone(),
            metadata: meta.container.clone(),
            image: meta.image.clone(),
            state,
            created_at: status.created_at,
            started_at: status.started_at,
            finished_at: status.finished_at,
            exit_code: status.exit_code,
            reason,
            message: status.message,
            labels: meta.labels.clone(),
            annotations: meta.annotations.clone(),
            log_path: meta.log_path.clone(),
        }
    }
}

/// Filter for listing containers. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct ContainerFilter {
    pub id: Option<ContainerId>,
    pub state: Option<ContainerState>,
    pub sandbox_id: Option<SandboxId>,
    /// Every label here must be present with the same value.
    pub labels: HashMap<String, String>,
}

impl ContainerFilter {
    pub(crate) fn matches(&self, view: &ContainerStatusView) -> bool {
        self.id.as_ref().is_none_or(|id| *id == view.id)
            && self.state.is_none_or(|state| state == view.state)
            && self
                .sandbox_id
                .as_ref()
                .is_none_or(|sandbox| *sandbox == view.sandbox_id)
            && self
                .labels
                .iter()
                .all(|(k, v)| view.labels.get(k) == Some(v))
    }
}

/// Attach request as negotiated with the streaming endpoint provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub container_id: ContainerId,
    pub stdin: bool,
    pub stdout: bool,
    pub stderr: bool,
    pub tty: bool,
}

/// Terminal window size sent by an attached client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminalSize {
    pub width: u16,
    pub height: u16,
}

/// Identity of the container a stats sample belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerAttributes {
    pub id: ContainerId,
    pub metadata: ContainerMetadata,
    pub labels: HashMap<String, String>,
    pub annotations: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuUsage {
    /// Sample time in nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub usage_core_nano_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MemoryUsage {
    /// Sample time in nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub working_set_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerStats {
    pub attributes: ContainerAttributes,
    pub cpu: Option<CpuUsage>,
    pub memory: Option<MemoryUsage>,
}
