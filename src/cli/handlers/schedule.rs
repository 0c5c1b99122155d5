//! Schedule command handler
//!
//! Keeps an engine running with the given jobs until the shutdown future
//! resolves, then stops the services in reverse start order.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::settings::Settings;
use crate::engine::Engine;
use crate::error::{AppError, AppResult};
use crate::jobs::{JobConfig, JobRegistry, LoggingListener};

pub struct ScheduleCommandHandler {
    settings: Settings,
    registry: JobRegistry,
}

impl ScheduleCommandHandler {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: JobRegistry::with_defaults(),
        }
    }

    /// Job files to schedule: the given ones, or every `*.toml` in
    /// `jobs.directory` in name order.
    pub fn job_files(&self, jobs: &[PathBuf]) -> AppResult<Vec<PathBuf>> {
        if !jobs.is_empty() {
            return Ok(jobs.to_vec());
        }

        let directory = Path::new(&self.settings.jobs.directory);
        let entries = std::fs::read_dir(directory).map_err(|e| {
            AppError::validation(
                "jobs.directory",
                format!("cannot read {}: {}", directory.display(), e),
            )
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(AppError::validation(
                "jobs.directory",
                format!("no *.toml job files in {}", directory.display()),
            ));
        }
        Ok(files)
    }

    pub async fn execute<F>(self, jobs: &[PathBuf], shutdown: F) -> AppResult<()>
    where
        F: Future<Output = ()>,
    {
        let configs = self
            .job_files(jobs)?
            .iter()
            .map(|path| super::load_job_file(path, &self.registry))
            .collect::<AppResult<Vec<JobConfig>>>()?;

        let engine = Engine::from_settings_with_registry(&self.settings, self.registry);
        engine.start().await?;

        let listener = Arc::new(LoggingListener);
        for config in configs {
            let job_name = config.job_name().unwrap_or_default().to_string();
            let trigger = config.schedule().unwrap_or("once").to_string();
            if let Err(e) = engine.manager().schedule_job(config, listener.clone()).await {
                // Leave the engine in a clean state before reporting.
                if let Err(stop_error) = engine.stop().await {
                    tracing::error!(error = %stop_error, "Engine did not stop cleanly");
                }
                return Err(e.into());
            }
            println!("Scheduled {} ({})", job_name, trigger);
        }

        tracing::info!(
            jobs = engine.manager().scheduled_jobs().len(),
            "Scheduler running; waiting for shutdown signal"
        );
        shutdown.await;

        engine.stop().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StateStoreBackend;
    use crate::jobs::{FsStateStore, RunningState, StateStore};
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    fn settings(dir: &Path) -> Settings {
        let mut settings = Settings::default();
        settings.state_store.backend = StateStoreBackend::Fs;
        settings.state_store.directory = dir.join("state").display().to_string();
        settings.jobs.directory = dir.join("jobs").display().to_string();
        settings.engine.tracker.poll_interval_ms = 50;
        settings.engine.shutdown_timeout_secs = 5;
        settings
    }

    fn write_job(dir: &Path, name: &str) {
        let jobs = dir.join("jobs");
        fs::create_dir_all(&jobs).unwrap();
        let input = dir.join("input.txt");
        fs::write(&input, "hello").unwrap();
        let content = format!(
            "[job]\nname = \"{}\"\n\n[source]\ntype = \"file_list\"\nfiles = \"{}\"\n\n\
             [pipeline]\ntype = \"file_transform\"\n\n\
             [writer]\nstaging.dir = \"{}\"\noutput.dir = \"{}\"\n",
            name,
            input.display(),
            dir.join("staging").display(),
            dir.join("out").display()
        );
        fs::write(jobs.join(format!("{}.toml", name)), content).unwrap();
    }

    #[test]
    fn test_job_files_come_from_directory_in_order() {
        let dir = TempDir::new().unwrap();
        write_job(dir.path(), "b");
        write_job(dir.path(), "a");
        fs::write(dir.path().join("jobs").join("notes.txt"), "").unwrap();

        let handler = ScheduleCommandHandler::new(settings(dir.path()));
        let files = handler.job_files(&[]).unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.toml", "b.toml"]);
    }

    #[test]
    fn test_empty_jobs_directory_is_rejected() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("jobs")).unwrap();

        let handler = ScheduleCommandHandler::new(settings(dir.path()));
        match handler.job_files(&[]) {
            Err(AppError::Validation { field, .. }) => assert_eq!(field, "jobs.directory"),
            other => panic!("expected a validation error, got {:?}", other),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_runs_until_shutdown_and_persists_state() {
        let dir = TempDir::new().unwrap();
        write_job(dir.path(), "greeting");
        let settings = settings(dir.path());
        let store = FsStateStore::new(&settings.state_store.directory);

        let shutdown = {
            let store = store.clone();
            async move {
                let persisted = async {
                    while !matches!(store.get("greeting").await, Ok(Some(_))) {
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                };
                tokio::time::timeout(Duration::from_secs(10), persisted)
                    .await
                    .unwrap();
            }
        };

        ScheduleCommandHandler::new(settings)
            .execute(&[], shutdown)
            .await
            .unwrap();

        let state = store.get("greeting").await.unwrap().unwrap();
        assert_eq!(state.state, RunningState::Committed);
    }
}
