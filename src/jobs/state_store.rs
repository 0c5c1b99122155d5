//! Durable persistence of job run state between runs, keyed by job name.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::state::JobState;

const CURRENT_FILE: &str = "current.json";

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Latest persisted run of a job.
    async fn get(&self, job_name: &str) -> JobResult<Option<JobState>>;

    /// Persist a finished run and make it the latest.
    async fn put(&self, state: &JobState) -> JobResult<()>;

    /// Every persisted run of a job, oldest first.
    async fn list_runs(&self, job_name: &str) -> JobResult<Vec<JobState>>;
}

/// One JSON document per run under `<root>/<job name>/<job id>.json`, with
/// `current.json` pointing at the latest.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    root: PathBuf,
}

impl FsStateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn job_dir(&self, job_name: &str) -> PathBuf {
        self.root.join(job_name)
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> JobResult<()> {
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_state(path: &Path) -> JobResult<Option<JobState>> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl StateStore for FsStateStore {
    async fn get(&self, job_name: &str) -> JobResult<Option<JobState>> {
        Self::read_state(&self.job_dir(job_name).join(CURRENT_FILE)).await
    }

    async fn put(&self, state: &JobState) -> JobResult<()> {
        let dir = self.job_dir(&state.job_name);
        tokio::fs::create_dir_all(&dir).await?;

        let bytes = serde_json::to_vec_pretty(state)?;
        Self::write_atomic(&dir.join(format!("{}.json", state.job_id)), &bytes).await?;
        Self::write_atomic(&dir.join(CURRENT_FILE), &bytes).await?;

        tracing::debug!(
            job_name = %state.job_name,
            job_id = %state.job_id,
            path = %dir.display(),
            "Persisted job state"
        );
        Ok(())
    }

    async fn list_runs(&self, job_name: &str) -> JobResult<Vec<JobState>> {
        let dir = self.job_dir(job_name);
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut runs = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_run = path.extension().is_some_and(|ext| ext == "json")
                && path.file_name().is_some_and(|name| name != CURRENT_FILE);
            if !is_run {
                continue;
            }
            if let Some(state) = Self::read_state(&path).await? {
                runs.push(state);
            }
        }

        runs.sort_by_key(|s| s.start_time);
        Ok(runs)
    }
}

/// Process-local store, for tests and `backend = "memory"`.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    runs: DashMap<String, Vec<JobState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn get(&self, job_name: &str) -> JobResult<Option<JobState>> {
        Ok(self
            .runs
            .get(job_name)
            .and_then(|runs| runs.last().cloned()))
    }

    async fn put(&self, state: &JobState) -> JobResult<()> {
        if state.job_name.is_empty() {
            return Err(JobError::StateStore("job name is empty".to_string()));
        }
        self.runs
            .entry(state.job_name.clone())
            .or_default()
            .push(state.clone());
        Ok(())
    }

    async fn list_runs(&self, job_name: &str) -> JobResult<Vec<JobState>> {
        Ok(self
            .runs
            .get(job_name)
            .map(|runs| runs.clone())
            .unwrap_or_default())
    }
}
