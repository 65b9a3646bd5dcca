// ABOUTME: Composable capability traits for the task engine.
// ABOUTME: Defines EngineOps, ContainerOps and TaskOps.

mod container;
mod engine;
pub(crate) mod sealed;
mod shared_types;
mod task;

pub use container::ContainerOps;
pub use engine::EngineOps;
pub use shared_types::*;
pub use task::TaskOps;
