// ABOUTME: Container lifecycle status and its transactional storage.
// ABOUTME: Every mutation goes through update, which commits the new value even on error.

use super::checkpoint::{Checkpoint, CheckpointError};
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;

/// Reason recorded when the task could not be started.
pub const REASON_START_ERROR: &str = "StartError";
/// Reason recorded when the task was killed for running out of memory.
pub const REASON_OOM_KILLED: &str = "OOMKilled";
/// Reason recorded when the task's fate could not be determined.
pub const REASON_UNKNOWN: &str = "Unknown";
/// Reported for a clean exit that carries no reason of its own.
pub const REASON_COMPLETED: &str = "Completed";
/// Reported for a failed exit that carries no reason of its own.
pub const REASON_ERROR: &str = "Error";

/// Exit code recorded for a container whose task failed to start.
pub const START_ERROR_EXIT_CODE: i32 = 128;
/// Exit code recorded when the real one was lost.
pub const UNKNOWN_EXIT_CODE: i32 = 255;

/// Current time as nanoseconds since the Unix epoch.
pub fn unix_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Created,
    Running,
    Exited,
    Unknown,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerState::Created => write!(f, "created"),
            ContainerState::Running => write!(f, "running"),
            ContainerState::Exited => write!(f, "exited"),
            ContainerState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Lifecycle bookkeeping of one container.
///
/// The state is derived from which timestamps are set, so it can only move
/// forward: created, then running, then exited.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Status {
    pub pid: u32,
    pub created_at: i64,
    pub started_at: i64,
    pub finished_at: i64,
    pub exit_code: i32,
    pub reason: String,
    pub message: String,
    /// Set while a removal is in flight. Never checkpointed.
    #[serde(skip)]
    pub removing: bool,
}

impl Status {
    pub fn state(&self) -> ContainerState {
        if self.finished_at != 0 {
            ContainerState::Exited
        } else if self.started_at != 0 {
            ContainerState::Running
        } else if self.created_at != 0 {
            ContainerState::Created
        } else {
            ContainerState::Unknown
        }
    }
}

/// Transactional holder of a container's status.
///
/// Transactions are serialized per container. Readers get the last committed
/// snapshot without waiting for an in-flight transaction.
pub struct StatusStorage {
    checkpoint: Checkpoint,
    txn: tokio::sync::Mutex<()>,
    snapshot: RwLock<Status>,
}

impl StatusStorage {
    pub fn new(checkpoint: Checkpoint, status: Status) -> Self {
        Self {
            checkpoint,
            txn: tokio::sync::Mutex::new(()),
            snapshot: RwLock::new(status),
        }
    }

    /// Last committed status.
    pub fn get(&self) -> Status {
        self.snapshot.read().clone()
    }

    /// Status after any in-flight transaction has committed.
    pub async fn get_sync(&self) -> Status {
        let _txn = self.txn.lock().await;
        self.get()
    }

    /// Run `f` on the current status and commit the status it returns, whether
    /// or not its outcome is an error. The outcome is returned to the caller.
    pub async fn update<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Status) -> (Status, Result<T, E>),
        E: From<CheckpointError>,
    {
        let _txn = self.txn.lock().await;
        let (next, outcome) = f(self.get());
        self.commit(next, outcome)
    }

    /// Like [`update`](Self::update) for transactions that await runtime
    /// calls. The container stays locked until the returned future completes.
    pub async fn update_async<T, E, F, Fut>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(Status) -> Fut,
        Fut: Future<Output = (Status, Result<T, E>)>,
        E: From<CheckpointError>,
    {
        let _txn = self.txn.lock().await;
        let (next, outcome) = f(self.get()).await;
        self.commit(next, outcome)
    }

    /// Remove the status checkpoint along with the rest of the container's
    /// checkpoint directory.
    pub fn delete(&self) -> Result<(), CheckpointError> {
        self.checkpoint.delete()
    }

    fn commit<T, E>(&self, next: Status, outcome: Result<T, E>) -> Result<T, E>
    where
        E: From<CheckpointError>,
    {
        let persisted = self.checkpoint.write_status(&next);
        *self.snapshot.write() = next;
        match (outcome, persisted) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(persist)) => {
                tracing::error!(
                    "Failed to checkpoint status in {}: {}",
                    self.checkpoint.dir().display(),
                    persist
                );
                Err(e)
            }
        }
    }
}
