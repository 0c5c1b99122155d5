//! State command handler

use std::sync::Arc;

use crate::config::settings::Settings;
use crate::config::StateStoreBackend;
use crate::engine::build_state_store;
use crate::error::AppResult;
use crate::jobs::{JobError, JobState, StateStore};

pub struct StateCommandHandler {
    store: Arc<dyn StateStore>,
}

impl StateCommandHandler {
    pub fn new(settings: &Settings) -> Self {
        if settings.state_store.backend == StateStoreBackend::Memory {
            tracing::warn!("The memory state store does not outlive a process; no runs will be found");
        }
        Self::with_store(build_state_store(&settings.state_store))
    }

    pub fn with_store(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Print the latest run as JSON, or one line per run with `history`.
    pub async fn execute(&self, job_name: &str, history: bool) -> AppResult<()> {
        println!("{}", self.render(job_name, history).await?);
        Ok(())
    }

    pub async fn render(&self, job_name: &str, history: bool) -> AppResult<String> {
        if history {
            let runs = self.store.list_runs(job_name).await?;
            if runs.is_empty() {
                return Err(JobError::NotFound(job_name.to_string()).into());
            }
            Ok(runs.iter().map(history_line).collect::<Vec<_>>().join("\n"))
        } else {
            let state = self
                .store
                .get(job_name)
                .await?
                .ok_or_else(|| JobError::NotFound(job_name.to_string()))?;
            Ok(serde_json::to_string_pretty(&state).map_err(JobError::from)?)
        }
    }
}

fn history_line(state: &JobState) -> String {
    format!(
        "{}  {:<10} {}/{} committed  started {}",
        state.job_id,
        state.state,
        state.committed_tasks(),
        state.total_tasks,
        state.start_time
    )
}
