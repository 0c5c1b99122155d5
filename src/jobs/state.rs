//! Job and task state records.
//!
//! These are plain data: the job manager and the task state tracker own the
//! transitions, and the state store persists the records between runs.

use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};

/// Work unit property naming the slice of source data a task's watermark
/// belongs to, e.g. the source file path.
pub const WATERMARK_KEY: &str = "watermark.key";

/// Slice used for tasks whose work unit names none.
const DEFAULT_WATERMARK_KEY: &str = "*";

/// Lifecycle state of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkingState {
    Pending,
    Running,
    Committed,
    Failed,
}

impl WorkingState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkingState::Committed | WorkingState::Failed)
    }
}

impl std::fmt::Display for WorkingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkingState::Pending => f.pad("pending"),
            WorkingState::Running => f.pad("running"),
            WorkingState::Committed => f.pad("committed"),
            WorkingState::Failed => f.pad("failed"),
        }
    }
}

/// Lifecycle state of a job run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunningState {
    Pending,
    Running,
    Committed,
    Failed,
    Aborted,
}

impl RunningState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunningState::Committed | RunningState::Failed | RunningState::Aborted
        )
    }
}

impl std::fmt::Display for RunningState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunningState::Pending => f.pad("pending"),
            RunningState::Running => f.pad("running"),
            RunningState::Committed => f.pad("committed"),
            RunningState::Failed => f.pad("failed"),
            RunningState::Aborted => f.pad("aborted"),
        }
    }
}

/// Immutable description of one slice of extraction work.
///
/// Produced by a [`Source`](crate::jobs::Source); the pipeline reads whatever
/// keys it needs (source location, target destination, watermarks).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkUnit {
    props: BTreeMap<String, String>,
}

impl WorkUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.props.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn props(&self) -> &BTreeMap<String, String> {
        &self.props
    }
}

impl FromIterator<(String, String)> for WorkUnit {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            props: iter.into_iter().collect(),
        }
    }
}

/// Runtime state of one task, reported to the job manager once terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskState {
    pub task_id: String,
    pub job_id: String,
    pub working_state: WorkingState,
    /// Work unit properties merged with whatever the pipeline reported.
    pub props: BTreeMap<String, String>,
    pub start_time: Option<Timestamp>,
    pub end_time: Option<Timestamp>,
    pub retries: u32,
    pub records_written: u64,
    pub bytes_written: u64,
    pub high_watermark: Option<i64>,
    pub error: Option<String>,
}

impl TaskState {
    pub fn new(task_id: String, job_id: String, work_unit: &WorkUnit) -> Self {
        Self {
            task_id,
            job_id,
            working_state: WorkingState::Pending,
            props: work_unit.props().clone(),
            start_time: None,
            end_time: None,
            retries: 0,
            records_written: 0,
            bytes_written: 0,
            high_watermark: None,
            error: None,
        }
    }

    pub fn get_prop(&self, key: &str) -> Option<&str> {
        self.props.get(key).map(String::as_str)
    }

    pub fn duration_ms(&self) -> Option<i64> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end.as_millisecond() - start.as_millisecond()),
            _ => None,
        }
    }
}

/// State of one job run, handed to the job listener and persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_name: String,
    pub job_id: String,
    pub state: RunningState,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
    /// Number of tasks the run materialized.
    pub total_tasks: usize,
    /// Number of tasks that reached a terminal state.
    pub completed_tasks: usize,
    pub task_states: Vec<TaskState>,
    pub props: BTreeMap<String, String>,
    /// Committed watermark per slice, carried over from earlier runs.
    #[serde(default)]
    pub watermarks: BTreeMap<String, i64>,
    pub error: Option<String>,
}

impl JobState {
    pub fn new(
        job_name: impl Into<String>,
        job_id: impl Into<String>,
        props: BTreeMap<String, String>,
    ) -> Self {
        Self {
            job_name: job_name.into(),
            job_id: job_id.into(),
            state: RunningState::Pending,
            start_time: Timestamp::now(),
            end_time: None,
            total_tasks: 0,
            completed_tasks: 0,
            task_states: Vec::new(),
            props,
            watermarks: BTreeMap::new(),
            error: None,
        }
    }

    pub fn committed_tasks(&self) -> usize {
        self.count(WorkingState::Committed)
    }

    pub fn failed_tasks(&self) -> usize {
        self.count(WorkingState::Failed)
    }

    fn count(&self, state: WorkingState) -> usize {
        self.task_states
            .iter()
            .filter(|t| t.working_state == state)
            .count()
    }

    /// Committed watermark of one slice, used to resume incremental
    /// extraction on the next run.
    pub fn watermark(&self, key: &str) -> Option<i64> {
        self.watermarks.get(key).copied()
    }

    pub fn high_watermark(&self) -> Option<i64> {
        self.watermarks.values().copied().max()
    }

    /// Fold the watermarks of committed tasks in, keeping the highest value
    /// per slice. Failed tasks leave their slice where it was.
    pub fn record_watermarks(&mut self) {
        for task in &self.task_states {
            if task.working_state != WorkingState::Committed {
                continue;
            }
            let Some(watermark) = task.high_watermark else { continue };
            let key = task.get_prop(WATERMARK_KEY).unwrap_or(DEFAULT_WATERMARK_KEY);
            self.watermarks
                .entry(key.to_string())
                .and_modify(|current| *current = (*current).max(watermark))
                .or_insert(watermark);
        }
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| end.as_millisecond() - self.start_time.as_millisecond())
    }
}
