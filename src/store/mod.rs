// ABOUTME: In-memory registries for containers, sandboxes and reserved names.
// ABOUTME: Container status is transactional and checkpointed to disk.

mod checkpoint;
mod container;
mod error;
mod name_index;
mod sandbox;
mod status;

pub use checkpoint::{CHECKPOINT_VERSION, Checkpoint, CheckpointError, LoadedCheckpoint, load_all};
pub use container::{Container, ContainerStore, Metadata};
pub use error::StoreError;
pub use name_index::NameIndex;
pub use sandbox::{Sandbox, SandboxConfig, SandboxStore};
pub use status::{
    ContainerState, REASON_COMPLETED, REASON_ERROR, REASON_OOM_KILLED, REASON_START_ERROR,
    REASON_UNKNOWN, START_ERROR_EXIT_CODE, Status, StatusStorage, UNKNOWN_EXIT_CODE, unix_nanos,
};
