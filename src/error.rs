//! Top-level error type composed from each subsystem's own error enum.

use thiserror::Error;

pub use crate::cache::CacheError;
pub use crate::codec::CodecError;
pub use crate::config::UsageError;
pub use crate::graph::GraphError;
pub use crate::identity::ArgumentError;
pub use crate::process::ProcessError;
pub use crate::scheduler::SchedulerError;

#[derive(Debug, Error)]
pub enum GantryError {
    #[error(transparent)]
    Argument(#[from] ArgumentError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Process(#[from] ProcessError),

    #[error(transparent)]
    Usage(#[from] UsageError),

    /// A task's `run` body returned an application-level failure. The
    /// string is the task's own error rendering; `gantry` does not
    /// constrain what a task body considers an error.
    #[error("task `{task_name}` ({task_id}) failed: {source}")]
    TaskFailed {
        task_name: String,
        task_id: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}
