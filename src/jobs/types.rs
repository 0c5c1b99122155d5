use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::jobs::config::JobConfig;
use crate::jobs::error::{JobResult, TaskExecutionError};
use crate::jobs::retry::RetryPolicy;
use crate::jobs::state::{JobState, TaskState, WorkUnit};

/// Execution context passed to a pipeline attempt
#[derive(Debug, Clone)]
pub struct TaskContext {
    pub task_id: String,
    pub job_id: String,
    /// Zero for the first attempt, incremented on every retry.
    pub attempt: u32,
    pub work_unit: Arc<WorkUnit>,
    pub cancellation_token: CancellationToken,
}

/// What a successful pipeline attempt produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskOutput {
    pub records_written: u64,
    pub bytes_written: u64,
    pub high_watermark: Option<i64>,
    /// Merged into the task state's properties (e.g. where output was staged).
    pub props: BTreeMap<String, String>,
}

/// Produces the work units of one job run.
#[async_trait]
pub trait Source: Send + Sync + std::fmt::Debug {
    /// Registry name, matched against `source.type`
    fn source_type() -> &'static str
    where
        Self: Sized;

    /// Build the source from the job configuration
    fn from_config(config: &JobConfig) -> JobResult<Self>
    where
        Self: Sized;

    /// Split the job into work units. `previous` is the persisted state of
    /// the last run, if any, for incremental extraction.
    async fn work_units(
        &self,
        config: &JobConfig,
        previous: Option<&JobState>,
    ) -> JobResult<Vec<WorkUnit>>;
}

/// Extract, transform and stage one work unit; publish it on job commit.
#[async_trait]
pub trait TaskPipeline: Send + Sync + std::fmt::Debug {
    /// Registry name, matched against `pipeline.type`
    fn pipeline_type() -> &'static str
    where
        Self: Sized;

    fn from_config(config: &JobConfig) -> JobResult<Self>
    where
        Self: Sized;

    /// Run one attempt. Must leave nothing published: output is staged only.
    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput, TaskExecutionError>;

    /// Publish the staged output of a committed task.
    async fn publish(&self, task: &TaskState) -> Result<(), TaskExecutionError>;
}

/// Runtime instance of one work unit.
///
/// Moves by value between the executor (while running) and the tracker
/// (between attempts) so it never runs concurrently with itself.
#[derive(Debug)]
pub struct Task {
    pub state: TaskState,
    pub work_unit: Arc<WorkUnit>,
    pub pipeline: Arc<dyn TaskPipeline>,
    pub retry_policy: RetryPolicy,
    pub timeout: Option<Duration>,
    pub cancellation_token: CancellationToken,
}

impl Task {
    pub fn new(
        task_id: String,
        job_id: String,
        work_unit: WorkUnit,
        pipeline: Arc<dyn TaskPipeline>,
        retry_policy: RetryPolicy,
    ) -> Self {
        let state = TaskState::new(task_id, job_id, &work_unit);
        Self {
            state,
            work_unit: Arc::new(work_unit),
            pipeline,
            retry_policy,
            timeout: None,
            cancellation_token: CancellationToken::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    pub fn id(&self) -> &str {
        &self.state.task_id
    }

    pub fn context(&self) -> TaskContext {
        TaskContext {
            task_id: self.state.task_id.clone(),
            job_id: self.state.job_id.clone(),
            attempt: self.state.retries,
            work_unit: Arc::clone(&self.work_unit),
            cancellation_token: self.cancellation_token.clone(),
        }
    }

    pub fn task_id_for(job_id: &str, sequence: usize) -> String {
        format!("task_{}_{}", job_id, sequence)
    }
}
