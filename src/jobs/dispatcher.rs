use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::executor::TaskExecutor;
use crate::jobs::lifecycle::Service;
use crate::jobs::retry::RetryPolicy;
use crate::jobs::state::WorkUnit;
use crate::jobs::tracker::TaskStateTracker;
use crate::jobs::types::{Task, TaskPipeline};

/// Work units of one job run, ready to be materialized into tasks.
#[derive(Debug)]
pub struct DispatchRequest {
    pub job_id: String,
    pub work_units: Vec<WorkUnit>,
    pub pipeline: Arc<dyn TaskPipeline>,
    pub retry_policy: RetryPolicy,
    pub timeout: Option<Duration>,
    pub cancellation_token: CancellationToken,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Tasks accepted by the executor.
    pub submitted: usize,
    /// Tasks reported FAILED because they could not be submitted.
    pub failed: usize,
    /// Work units never materialized because the run was cancelled.
    pub skipped: usize,
}

impl DispatchSummary {
    /// Tasks that will reach the completion listener.
    pub fn dispatched(&self) -> usize {
        self.submitted + self.failed
    }
}

/// Turns work units into tracked tasks and feeds them to the executor.
pub struct WorkUnitManager {
    executor: Arc<TaskExecutor>,
    tracker: Arc<TaskStateTracker>,
    running: AtomicBool,
}

impl WorkUnitManager {
    pub fn new(executor: Arc<TaskExecutor>, tracker: Arc<TaskStateTracker>) -> Self {
        Self {
            executor,
            tracker,
            running: AtomicBool::new(false),
        }
    }

    /// Materialize every work unit into exactly one task.
    ///
    /// Waits for executor capacity when its queue is full. Every task counted
    /// in the returned summary's `dispatched()` is reported to the tracker's
    /// completion listener exactly once; a unit that cannot be submitted is
    /// reported as an immediately FAILED task.
    pub async fn dispatch(&self, request: DispatchRequest) -> DispatchSummary {
        let DispatchRequest {
            job_id,
            work_units,
            pipeline,
            retry_policy,
            timeout,
            cancellation_token,
        } = request;

        let total = work_units.len();
        let mut summary = DispatchSummary::default();

        for (sequence, work_unit) in work_units.into_iter().enumerate() {
            if cancellation_token.is_cancelled() {
                summary.skipped = total - sequence;
                break;
            }

            let task = Task::new(
                Task::task_id_for(&job_id, sequence),
                job_id.clone(),
                work_unit,
                Arc::clone(&pipeline),
                retry_policy.clone(),
            )
            .with_timeout(timeout)
            .with_cancellation(cancellation_token.clone());
            let task_id = task.id().to_string();

            self.tracker.register_task(&task);

            if !self.running.load(Ordering::Acquire) {
                let error = JobError::dispatch(&task_id, "work unit manager is not running");
                self.tracker.fail_task(task, error).await;
                summary.failed += 1;
                continue;
            }

            tokio::select! {
                biased;
                _ = cancellation_token.cancelled() => {
                    self.tracker.deregister(&task_id);
                    summary.skipped = total - sequence;
                    break;
                }
                submitted = self.executor.submit(task) => match submitted {
                    Ok(()) => summary.submitted += 1,
                    Err(rejected) => {
                        let error = JobError::dispatch(&task_id, rejected.reason);
                        self.tracker.fail_task(*rejected.task, error).await;
                        summary.failed += 1;
                    }
                },
            }
        }

        tracing::debug!(
            job_id = %job_id,
            submitted = summary.submitted,
            failed = summary.failed,
            skipped = summary.skipped,
            "Work units dispatched"
        );
        summary
    }
}

#[async_trait]
impl Service for WorkUnitManager {
    fn name(&self) -> &'static str {
        "work-unit-manager"
    }

    async fn start(self: Arc<Self>) -> JobResult<()> {
        self.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> JobResult<()> {
        self.running.store(false, Ordering::Release);
        Ok(())
    }
}
