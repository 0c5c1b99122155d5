use thiserror::Error;

use crate::config::ConfigError;
use crate::jobs::JobError;

/// Top-level error for the command line surface.
///
/// Library code returns [`JobError`] or [`ConfigError`]; both fold into this
/// type at the CLI boundary so handlers can use a single `?`.
#[derive(Error, Debug)]
pub enum AppError {
    /// Invalid argument or job file, found before anything ran
    #[error("Validation failed for {field}: {reason}")]
    Validation { field: String, reason: String },

    /// Settings could not be loaded or did not validate
    #[error("Configuration error: {key}")]
    Configuration {
        key: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Job(#[from] JobError),

    /// Internal error for unexpected failures
    #[error("Internal error")]
    Internal {
        #[source]
        source: anyhow::Error,
    },
}

impl AppError {
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Process exit code for this error: 2 for usage problems, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation { .. } | AppError::Configuration { .. } => 2,
            AppError::Job(JobError::Config { .. }) => 2,
            _ => 1,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(error: ConfigError) -> Self {
        let key = error.field().unwrap_or("settings").to_string();
        AppError::Configuration {
            key,
            source: error.into(),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        AppError::Internal { source: error }
    }
}

/// Type alias for Result with AppError to simplify function signatures
pub type AppResult<T> = Result<T, AppError>;
