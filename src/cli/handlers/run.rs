//! Run command handler
//!
//! Runs each job once on a private engine, waits for all of them and prints
//! one summary line per job.

use std::path::PathBuf;

use futures::future::join_all;

use crate::config::settings::Settings;
use crate::engine::Engine;
use crate::error::{AppError, AppResult};
use crate::jobs::{JobConfig, JobRegistry, JobState, RunningState};

/// Outcome of one job file
#[derive(Debug)]
pub enum RunOutcome {
    Finished(JobState),
    /// The run could not be started, e.g. a second file with the same job name.
    Rejected { job_name: String, error: String },
}

impl RunOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, RunOutcome::Finished(state) if state.state == RunningState::Committed)
    }

    fn summary_line(&self) -> String {
        match self {
            RunOutcome::Finished(state) => {
                let mut line = format!(
                    "{:<24} {:<10} {}/{} tasks committed",
                    state.job_name,
                    state.state,
                    state.committed_tasks(),
                    state.total_tasks
                );
                if let Some(ms) = state.duration_ms() {
                    line.push_str(&format!(" in {}ms", ms));
                }
                if let Some(error) = &state.error {
                    line.push_str(&format!(" ({})", error));
                }
                line
            }
            RunOutcome::Rejected { job_name, error } => {
                format!("{:<24} {:<10} {}", job_name, "rejected", error)
            }
        }
    }
}

pub struct RunCommandHandler {
    settings: Settings,
    registry: JobRegistry,
}

impl RunCommandHandler {
    pub fn new(settings: Settings) -> Self {
        Self::with_registry(settings, JobRegistry::with_defaults())
    }

    pub fn with_registry(settings: Settings, registry: JobRegistry) -> Self {
        Self { settings, registry }
    }

    /// Validate every file first; nothing runs if one of them is invalid.
    ///
    /// # Errors
    ///
    /// Invalid job files, engine start failures, and any job that did not
    /// end COMMITTED.
    pub async fn execute(self, jobs: &[PathBuf], dry_run: bool) -> AppResult<()> {
        let configs = jobs
            .iter()
            .map(|path| super::load_job_file(path, &self.registry))
            .collect::<AppResult<Vec<JobConfig>>>()?;

        if dry_run {
            for (path, config) in jobs.iter().zip(&configs) {
                println!(
                    "✓ {} ({}) is valid",
                    path.display(),
                    config.job_name().unwrap_or_default()
                );
            }
            println!("Dry run completed successfully");
            return Ok(());
        }

        let outcomes = self.run_all(configs).await?;
        for outcome in &outcomes {
            println!("{}", outcome.summary_line());
        }

        let failed = outcomes.iter().filter(|o| !o.is_committed()).count();
        if failed > 0 {
            return Err(AppError::from(anyhow::anyhow!(
                "{} of {} jobs did not commit",
                failed,
                outcomes.len()
            )));
        }
        Ok(())
    }

    /// Start an engine, run the jobs concurrently and stop it again.
    pub async fn run_all(self, configs: Vec<JobConfig>) -> AppResult<Vec<RunOutcome>> {
        let engine = Engine::from_settings_with_registry(&self.settings, self.registry);
        engine.start().await?;

        let manager = engine.manager();
        let runs = configs.into_iter().map(|config| async move {
            let job_name = config.job_name().unwrap_or_default().to_string();
            match manager.run_job(config).await {
                Ok(state) => RunOutcome::Finished(state),
                Err(e) => {
                    tracing::warn!(job_name = %job_name, error = %e, "Job run rejected");
                    RunOutcome::Rejected {
                        job_name,
                        error: e.to_string(),
                    }
                }
            }
        });
        let outcomes = join_all(runs).await;

        engine.stop().await?;
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateStoreBackend;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn settings() -> Settings {
        let mut settings = Settings::default();
        settings.state_store.backend = StateStoreBackend::Memory;
        settings.engine.retry.max_retries = 0;
        settings.engine.retry.delay_ms = 1;
        settings.engine.tracker.poll_interval_ms = 50;
        settings.engine.shutdown_timeout_secs = 5;
        settings
    }

    fn write_job(dir: &Path, name: &str, files: &str) -> PathBuf {
        let path = dir.join(format!("{}.toml", name));
        let content = format!(
            r#"
[job]
name = "{name}"

[source]
type = "file_list"
files = "{files}"

[pipeline]
type = "file_transform"

[transform]
type = "uppercase"

[writer.staging]
dir = "{staging}"

[writer.output]
dir = "{output}"
"#,
            name = name,
            files = files,
            staging = dir.join("staging").display(),
            output = dir.join("out").display(),
        );
        fs::write(&path, content).unwrap();
        path
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runs_every_file_to_completion() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        fs::write(&input, "abc").unwrap();
        let first = write_job(dir.path(), "first", &input.display().to_string());
        let second = write_job(dir.path(), "second", &input.display().to_string());

        RunCommandHandler::new(settings())
            .execute(&[first, second], false)
            .await
            .unwrap();

        let outputs: Vec<_> = fs::read_dir(dir.path().join("out"))
            .unwrap()
            .filter_map(Result::ok)
            .map(|e| fs::read_to_string(e.path()).unwrap())
            .collect();
        assert_eq!(outputs, vec!["ABC".to_string(), "ABC".to_string()]);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_failed_job_is_an_error() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("missing.txt");
        let job = write_job(dir.path(), "broken", &missing.display().to_string());

        let err = RunCommandHandler::new(settings())
            .execute(&[job], false)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Internal { .. }));
    }

    #[tokio::test]
    async fn test_dry_run_validates_without_running() {
        let dir = TempDir::new().unwrap();
        let input = dir.path().join("input.txt");
        fs::write(&input, "abc").unwrap();
        let job = write_job(dir.path(), "checked", &input.display().to_string());

        RunCommandHandler::new(settings())
            .execute(&[job], true)
            .await
            .unwrap();
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_invalid_file_names_the_path() {
        let dir = TempDir::new().unwrap();
        let job = dir.path().join("bad.toml");
        fs::write(&job, "[job]\nname = \"bad\"\n").unwrap();

        let err = RunCommandHandler::new(settings())
            .execute(&[job.clone()], false)
            .await
            .unwrap_err();
        match err {
            AppError::Validation { field, reason } => {
                assert_eq!(field, job.display().to_string());
                assert!(reason.contains("source.type"));
            }
            other => panic!("expected a validation error, got {:?}", other),
        }
    }
}
