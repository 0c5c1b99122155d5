//! Command handlers for CLI operations

pub mod run;
pub mod schedule;
pub mod state;

pub use run::RunCommandHandler;
pub use schedule::ScheduleCommandHandler;
pub use state::StateCommandHandler;

use std::path::Path;

use crate::error::{AppError, AppResult};
use crate::jobs::{JobConfig, JobRegistry};

/// Parse and validate a job file, including its connector settings.
pub(crate) fn load_job_file(path: &Path, registry: &JobRegistry) -> AppResult<JobConfig> {
    let invalid =
        |e: crate::jobs::JobError| AppError::validation(path.display().to_string(), e.to_string());

    let config = JobConfig::from_file(path).map_err(invalid)?;
    config.validate().map_err(invalid)?;
    registry.create_source(&config).map_err(invalid)?;
    registry.create_pipeline(&config).map_err(invalid)?;
    Ok(config)
}
