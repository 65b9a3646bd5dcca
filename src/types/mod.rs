// ABOUTME: Type-safe identifiers and validated domain types.
// ABOUTME: Uses phantom types to prevent ID confusion at compile time.

mod container_name;
mod id;

pub use container_name::{ContainerMetadata, ContainerName, ContainerNameError, SandboxMetadata};
pub use id::{ContainerId, Id, SandboxId};
