use thiserror::Error;

/// Errors surfaced by a [`crate::RunnerHandle`].
///
/// Mirrors the breadth of `slab_core::services::llama::LlamaServiceError`
/// (the teacher's global-singleton inference backend), generalized to an
/// instance-level handle instead of a process-wide singleton.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error("runner process exited before it finished loading")]
    WorkerCrashed,
    #[error("model does not fit in the requested memory budget (lone model)")]
    LoadRequiredFull,
    #[error("runner does not have capability {0:?}")]
    MissingCapability(String),
    #[error("runner health ping timed out after {0:?}")]
    PingTimeout(std::time::Duration),
    #[error("runner has already exited")]
    AlreadyExited,
    #[error("runner I/O error: {0}")]
    Io(String),
    #[error("runner was cancelled")]
    Cancelled,
    #[error("runner backend error: {0}")]
    Backend(String),
}
