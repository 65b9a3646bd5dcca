// ABOUTME: Lifecycle error types with SNAFU pattern.
// ABOUTME: Every failure carries the container and operation; kind() classifies it.

use crate::io::IoError;
use crate::runtime::RuntimeError;
use crate::store::{CheckpointError, ContainerState, StoreError};
use crate::stream::StreamError;
use crate::types::ContainerNameError;
use snafu::Snafu;
use std::path::PathBuf;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ServiceError {
    #[snafu(display("container {id} not found: {source}"))]
    ContainerNotFound { id: String, source: StoreError },

    #[snafu(display("sandbox {id} not found: {source}"))]
    SandboxNotFound { id: String, source: StoreError },

    #[snafu(display("cannot {op} container {id}: container is in {state} state"))]
    InvalidState {
        id: String,
        op: &'static str,
        state: ContainerState,
    },

    #[snafu(display("cannot {op} container {id}: container is being removed"))]
    Removing { id: String, op: &'static str },

    #[snafu(display("cannot {op} container {id}: sandbox {sandbox_id} is not running"))]
    SandboxNotRunning {
        id: String,
        op: &'static str,
        sandbox_id: String,
    },

    #[snafu(display("failed to {op} container {id}: {source}"))]
    Runtime {
        id: String,
        op: &'static str,
        source: RuntimeError,
    },

    #[snafu(display("unexpected {what} for container {id}: {detail}"))]
    UnexpectedShape {
        id: String,
        what: &'static str,
        detail: String,
    },

    #[snafu(display("failed to decode metrics of container {id}: {source}"))]
    DecodeMetrics {
        id: String,
        source: serde_json::Error,
    },

    #[snafu(display("invalid container name: {source}"))]
    InvalidName { source: ContainerNameError },

    #[snafu(display("failed to reserve name {name}: {source}"))]
    NameReserved { name: String, source: StoreError },

    #[snafu(display("failed to add container {id}: {source}"))]
    Store { id: String, source: StoreError },

    #[snafu(display("checkpoint of container {id}: {source}"))]
    Checkpoint {
        id: String,
        source: CheckpointError,
    },

    #[snafu(display("failed to read checkpoints in {}: {source}", path.display()))]
    LoadCheckpoints {
        path: PathBuf,
        source: CheckpointError,
    },

    #[snafu(display("failed to checkpoint status: {source}"))]
    StatusCheckpoint { source: CheckpointError },

    #[snafu(display("failed to {op} root directory {}: {source}", path.display()))]
    RootDir {
        op: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("I/O of container {id}: {source}"))]
    Io { id: String, source: IoError },

    #[snafu(display("no attach endpoint for container {id}: {source}"))]
    Stream { id: String, source: StreamError },
}

/// Error kind for programmatic handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    /// The container or sandbox is unknown.
    NotFound,
    /// The operation's preconditions on state or removal are violated.
    StateConflict,
    /// The request itself is malformed.
    InvalidArgument,
    /// The engine rejected or failed an operation.
    Runtime,
    /// A collaborator answered with an unexpected structure.
    Shape,
    /// Local persistence or plumbing failed.
    Internal,
}

impl ServiceError {
    /// Returns the error kind for programmatic handling.
    pub fn kind(&self) -> ServiceErrorKind {
        match self {
            ServiceError::ContainerNotFound { .. } | ServiceError::SandboxNotFound { .. } => {
                ServiceErrorKind::NotFound
            }
            ServiceError::InvalidState { .. }
            | ServiceError::Removing { .. }
            | ServiceError::SandboxNotRunning { .. }
            | ServiceError::NameReserved { .. } => ServiceErrorKind::StateConflict,
            ServiceError::InvalidName { .. } => ServiceErrorKind::InvalidArgument,
            ServiceError::Runtime { .. } | ServiceError::Stream { .. } => ServiceErrorKind::Runtime,
            ServiceError::UnexpectedShape { .. } | ServiceError::DecodeMetrics { .. } => {
                ServiceErrorKind::Shape
            }
            ServiceError::Store { .. }
            | ServiceError::Checkpoint { .. }
            | ServiceError::LoadCheckpoints { .. }
            | ServiceError::StatusCheckpoint { .. }
            | ServiceError::RootDir { .. }
            | ServiceError::Io { .. } => ServiceErrorKind::Internal,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.kind() == ServiceErrorKind::NotFound
    }
}

impl From<CheckpointError> for ServiceError {
    fn from(source: CheckpointError) -> Self {
        ServiceError::StatusCheckpoint { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_errors() {
        let not_found = ServiceError::ContainerNotFound {
            id: "c1".to_string(),
            source: StoreError::NotExist("container c1".to_string()),
        };
        assert!(not_found.is_not_found());

        let conflict = ServiceError::InvalidState {
            id: "c1".to_string(),
            op: "start",
            state: ContainerState::Running,
        };
        assert_eq!(conflict.kind(), ServiceErrorKind::StateConflict);
        assert_eq!(
            conflict.to_string(),
            "cannot start container c1: container is in running state"
        );

        let runtime = ServiceError::Runtime {
            id: "c1".to_string(),
            op: "delete",
            source: RuntimeError::Runtime("boom".to_string()),
        };
        assert_eq!(runtime.kind(), ServiceErrorKind::Runtime);
        assert!(runtime.to_string().contains("c1"));
        assert!(runtime.to_string().contains("delete"));
    }
}
