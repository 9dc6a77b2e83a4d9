use thiserror::Error;

/// Error text stored on a status record when the user aborted the job
pub const ABORT_SENTINEL: &str = "conversion aborted by user";

/// Rejections returned by `WorkerPool::submit`
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("conversion queue is full")]
    QueueFull,
    #[error("worker pool is stopped")]
    Stopped,
}

/// Outcomes of an abort request that did not deliver a signal
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    #[error("no running conversion with that id")]
    NotFound,
    #[error("conversion already complete")]
    AlreadyComplete,
    #[error("failed to signal encoder: {0}")]
    Signal(String),
}

/// Reasons a job ends in a failed (or aborted) terminal state.
/// The `Display` text is what pollers see in the status `error` field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    #[error("unsupported target format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid conversion flags: {0}")]
    InvalidFlags(String),
    #[error("failed to prepare conversion: {0}")]
    Prepare(String),
    #[error("failed to start encoder: {0}")]
    Spawn(String),
    #[error("encoder exited with code {code}: {stderr}")]
    ExitStatus { code: i32, stderr: String },
    #[error("encoder produced no output file")]
    MissingOutput,
    #[error("encoder produced an empty output file")]
    EmptyOutput,
    #[error("conversion worker crashed: {0}")]
    Crashed(String),
    #[error("{}", ABORT_SENTINEL)]
    Aborted,
}
