use thiserror::Error;

use forge_runner::RunnerError;

/// Scheduler-level errors, per spec §4.1/§7.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("admission queue is full")]
    MaxQueue,
    #[error("model does not fit in the requested memory budget")]
    LoadRequiredFull,
    #[error("runner lacks capability {0:?}")]
    MissingCapability(String),
    #[error("request was cancelled")]
    Cancelled,
    #[error("model not found: {0}")]
    ModelNotFound(String),
    #[error("runner process failed: {0}")]
    WorkerFailed(#[from] RunnerError),
    #[error("scheduler has shut down")]
    ShuttingDown,
}
