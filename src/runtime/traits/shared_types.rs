// ABOUTME: Shared types used across engine trait definitions.
// ABOUTME: ContainerSpec, TaskIo, TaskStatus, task events and metrics.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::path::PathBuf;
use tokio::io::{AsyncRead, AsyncWrite};

/// Boxed read half of a task stream.
pub type IoReader = Box<dyn AsyncRead + Send + Unpin>;

/// Boxed write half of a task stream.
pub type IoWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Configuration for creating an engine container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    /// Engine ID to create the container under.
    pub id: String,
    /// Command and arguments. Empty for sandbox holder containers.
    pub command: Vec<String>,
    /// Environment variables.
    pub env: HashMap<String, String>,
    /// Working directory of the process.
    pub working_dir: Option<PathBuf>,
    /// Labels recorded on the container object.
    pub labels: HashMap<String, String>,
}

/// I/O endpoints a task is bound to.
///
/// The engine writes process output into `stdout`/`stderr` and reads process
/// input from `stdin`. With `terminal` set, stderr is merged into stdout.
pub struct TaskIo {
    pub stdin: Option<IoReader>,
    pub stdout: IoWriter,
    pub stderr: IoWriter,
    pub terminal: bool,
}

impl std::fmt::Debug for TaskIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskIo")
            .field("stdin", &self.stdin.is_some())
            .field("terminal", &self.terminal)
            .finish_non_exhaustive()
    }
}

/// Task status as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Created,
    Running,
    Paused,
    Stopped,
    Unknown,
}

/// Exit information returned when a task is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitStatus {
    pub code: i32,
    pub exited_at: DateTime<Utc>,
}

/// Options for deleting a container object.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteOpts {
    /// Also remove the container's snapshot/rootfs.
    pub cleanup_snapshot: bool,
}

/// Options for deleting a task.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskDeleteOpts {
    /// Kill the process before deleting.
    pub kill: bool,
}

/// Options for closing task I/O.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloseIoOpts {
    /// Close the process's stdin.
    pub stdin: bool,
}

/// Filter for metrics queries.
#[derive(Debug, Clone, Default)]
pub struct MetricsFilter {
    /// Only tasks of these container IDs. Empty matches all tasks.
    pub ids: Vec<String>,
}

impl MetricsFilter {
    /// Filter matching exactly one container's task.
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            ids: vec![id.into()],
        }
    }

    pub fn matches(&self, id: &str) -> bool {
        self.ids.is_empty() || self.ids.iter().any(|i| i == id)
    }
}

/// Raw metrics for one task.
///
/// `data` is an engine-specific document (cgroup shaped) that callers decode.
#[derive(Debug, Clone)]
pub struct TaskMetrics {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub data: serde_json::Value,
}

/// A task's process exited.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub container_id: String,
    pub pid: u32,
    pub exit_status: i32,
    pub exited_at: DateTime<Utc>,
}

/// Lifecycle events published by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskEvent {
    Exit(TaskExit),
    Oom { container_id: String },
}

impl TaskEvent {
    pub fn container_id(&self) -> &str {
        match self {
            TaskEvent::Exit(exit) => &exit.container_id,
            TaskEvent::Oom { container_id } => container_id,
        }
    }
}
