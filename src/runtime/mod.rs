// ABOUTME: Task engine abstraction the shim drives containers through.
// ABOUTME: Capability traits plus the process engine and the in-memory mock.

mod error;
pub mod mock;
mod process;
pub mod traits;

pub use error::RuntimeError;
pub use mock::{MockEngine, MockOp};
pub use process::{ProcessEngine, ProcessEngineConfig};
pub use traits::{
    CloseIoOpts, ContainerOps, ContainerSpec, DeleteOpts, EngineOps, ExitStatus, IoReader,
    IoWriter, MetricsFilter, TaskDeleteOpts, TaskEvent, TaskExit, TaskIo, TaskMetrics, TaskOps,
    TaskStatus,
};
