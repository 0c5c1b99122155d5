use thiserror::Error;

/// Errors raised by the scheduling kernel itself.
///
/// Task-level failures never surface through this type: they are folded into
/// a terminal [`TaskState`](crate::jobs::TaskState) and aggregated by the job
/// manager.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("Invalid job configuration: {key} - {message}")]
    Config { key: String, message: String },

    #[error("Failed to dispatch task {task_id}: {reason}")]
    Dispatch { task_id: String, reason: String },

    #[error("Components did not stop cleanly within {timeout_ms}ms: {}", services.join(", "))]
    ShutdownTimeout { services: Vec<String>, timeout_ms: u64 },

    #[error("Service {service} failed to start: {message}")]
    Startup { service: String, message: String },

    #[error("Service is not running: {0}")]
    NotRunning(&'static str),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Job already scheduled: {0}")]
    AlreadyScheduled(String),

    #[error("Job is already running: {0}")]
    AlreadyRunning(String),

    #[error("Source failed to produce work units: {0}")]
    Source(String),

    #[error("State store error: {0}")]
    StateStore(String),

    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl JobError {
    pub fn config(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Config {
            key: key.into(),
            message: message.into(),
        }
    }

    pub fn dispatch(task_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Dispatch {
            task_id: task_id.into(),
            reason: reason.into(),
        }
    }

    pub fn is_config(&self) -> bool {
        matches!(self, Self::Config { .. })
    }
}

pub type JobResult<T> = Result<T, JobError>;

/// Outcome of a failed pipeline attempt.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TaskExecutionError {
    #[error("Retryable failure: {0}")]
    Retryable(String),

    #[error("Unrecoverable failure: {0}")]
    Fatal(String),

    #[error("Task attempt timed out after {0}s")]
    Timeout(u64),

    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Task cancelled")]
    Cancelled,
}

impl TaskExecutionError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    /// Whether the tracker may re-submit the task after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_) | Self::Timeout(_))
    }
}

impl From<std::io::Error> for TaskExecutionError {
    fn from(error: std::io::Error) -> Self {
        match error.kind() {
            std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                Self::Fatal(error.to_string())
            }
            _ => Self::Retryable(error.to_string()),
        }
    }
}
