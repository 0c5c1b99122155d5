//! Top-level job scheduling and completion accounting.
//!
//! Every run of a job gets a fresh [`JobState`]. Terminal task states arrive
//! from the tracker on any number of concurrent handlers; the per-run
//! accounting lock makes "record, increment, compare, mark finalized" a
//! single step so exactly one caller commits the run and notifies the
//! listener.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use futures::FutureExt;
use jiff::Timestamp;
use tokio::sync::{Notify, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use crate::jobs::config::{JobConfig, keys};
use crate::jobs::dispatcher::{DispatchRequest, WorkUnitManager};
use crate::jobs::error::{JobError, JobResult};
use crate::jobs::lifecycle::Service;
use crate::jobs::listener::{CompletionSignal, JobListener};
use crate::jobs::registry::JobRegistry;
use crate::jobs::retry::RetryPolicy;
use crate::jobs::scheduler::CronTrigger;
use crate::jobs::state::{JobState, RunningState, TaskState, WorkingState};
use crate::jobs::state_store::StateStore;
use crate::jobs::tracker::{TaskCompletionListener, TaskStateTracker};
use crate::jobs::types::{Source, TaskPipeline};

/// Tracks active runs per job name
#[derive(Clone, Default)]
pub struct ConcurrencyTracker {
    running: Arc<RwLock<HashMap<String, usize>>>,
}

impl ConcurrencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim a run slot; fails when a run is active and overlap is not allowed.
    pub async fn try_acquire(&self, job_name: &str, allow_concurrent: bool) -> bool {
        let mut running = self.running.write().await;
        if !allow_concurrent && running.contains_key(job_name) {
            return false;
        }
        *running.entry(job_name.to_string()).or_insert(0) += 1;
        true
    }

    pub async fn release(&self, job_name: &str) {
        let mut running = self.running.write().await;
        if let Some(count) = running.get_mut(job_name) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                running.remove(job_name);
            }
        }
    }
}

/// Engine-wide defaults a job's configuration may override
#[derive(Debug, Clone, Default)]
pub struct ManagerDefaults {
    pub retry_policy: RetryPolicy,
    pub task_timeout: Option<Duration>,
}

struct RunAccounting {
    state: JobState,
    /// Tasks that will report back; unknown until dispatch returns.
    expected: Option<usize>,
    has_failure: bool,
    finalized: bool,
}

struct JobRun {
    job_id: String,
    job_name: String,
    config: JobConfig,
    listener: Arc<dyn JobListener>,
    pipeline: Arc<dyn TaskPipeline>,
    retry_policy: RetryPolicy,
    timeout: Option<Duration>,
    cancellation_token: CancellationToken,
    accounting: Mutex<RunAccounting>,
}

impl JobRun {
    fn accounting(&self) -> MutexGuard<'_, RunAccounting> {
        self.accounting.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Flip `finalized` if every expected task has reported. Returns whether
    /// this caller won the right to finalize.
    fn claim_finalize(accounting: &mut RunAccounting) -> bool {
        if accounting.finalized || accounting.expected != Some(accounting.state.completed_tasks) {
            return false;
        }
        accounting.finalized = true;
        true
    }
}

/// Accepts job submissions and drives each run to exactly one terminal state
pub struct JobManager {
    self_ref: Weak<JobManager>,
    dispatcher: Arc<WorkUnitManager>,
    registry: Arc<JobRegistry>,
    state_store: Arc<dyn StateStore>,
    defaults: ManagerDefaults,
    runs: DashMap<String, Arc<JobRun>>,
    scheduled: DashMap<String, Uuid>,
    concurrency: ConcurrencyTracker,
    cron: CronTrigger,
    run_seq: AtomicU64,
    idle: Notify,
    accepting: AtomicBool,
}

impl JobManager {
    /// Create the manager and register it as the tracker's completion listener.
    pub fn new(
        dispatcher: Arc<WorkUnitManager>,
        tracker: &TaskStateTracker,
        registry: Arc<JobRegistry>,
        state_store: Arc<dyn StateStore>,
        defaults: ManagerDefaults,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref: &Weak<JobManager>| {
            let listener: Weak<dyn TaskCompletionListener> = self_ref.clone();
            if !tracker.set_completion_listener(listener) {
                tracing::warn!("Task state tracker already had a completion listener");
            }
            Self {
                self_ref: self_ref.clone(),
                dispatcher,
                registry,
                state_store,
                defaults,
                runs: DashMap::new(),
                scheduled: DashMap::new(),
                concurrency: ConcurrencyTracker::new(),
                cron: CronTrigger::new(),
                run_seq: AtomicU64::new(0),
                idle: Notify::new(),
                accepting: AtomicBool::new(false),
            }
        })
    }

    fn this(&self) -> JobResult<Arc<Self>> {
        self.self_ref.upgrade().ok_or(JobError::NotRunning("job-manager"))
    }

    fn ensure_accepting(&self) -> JobResult<()> {
        if self.accepting.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(JobError::NotRunning("job-manager"))
        }
    }

    /// Submit a job. Returns once the run is started or the trigger is
    /// registered; the outcome arrives through `listener`.
    ///
    /// An invalid configuration fails this call and nothing is dispatched.
    pub async fn schedule_job(
        &self,
        config: JobConfig,
        listener: Arc<dyn JobListener>,
    ) -> JobResult<()> {
        self.ensure_accepting()?;
        config.validate()?;

        if config.is_run_once()? {
            let this = self.this()?;
            let (run, source) = self.begin_run(config, listener).await?;
            tokio::spawn(async move { this.execute_run(run, source).await });
            Ok(())
        } else {
            self.schedule_recurring(config, listener).await
        }
    }

    /// Run a job once and wait for its final state.
    pub async fn run_job(&self, config: JobConfig) -> JobResult<JobState> {
        let config = config.with(keys::JOB_RUN_ONCE, "true");
        let (signal, completed) = CompletionSignal::new();
        self.schedule_job(config, Arc::new(signal)).await?;
        completed
            .await
            .map_err(|_| JobError::Scheduler("job run ended without reporting".to_string()))
    }

    /// Abort every active run of `job_name`. Returns how many were aborted.
    pub fn cancel_job(&self, job_name: &str) -> JobResult<usize> {
        let runs: Vec<Arc<JobRun>> = self
            .runs
            .iter()
            .filter(|entry| entry.value().job_name == job_name)
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        if runs.is_empty() {
            return Err(JobError::NotFound(job_name.to_string()));
        }
        for run in &runs {
            tracing::info!(job_name, job_id = %run.job_id, "Cancelling job run");
            run.cancellation_token.cancel();
        }
        Ok(runs.len())
    }

    /// Remove the recurring trigger of `job_name`. Active runs continue.
    pub async fn unschedule_job(&self, job_name: &str) -> JobResult<()> {
        let (_, id) = self
            .scheduled
            .remove(job_name)
            .ok_or_else(|| JobError::NotFound(job_name.to_string()))?;
        self.cron.remove(&id).await?;
        tracing::info!(job_name, "Job unscheduled");
        Ok(())
    }

    pub fn scheduled_jobs(&self) -> Vec<String> {
        let mut names: Vec<String> = self.scheduled.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Ids of runs that have not finalized yet.
    pub fn active_runs(&self) -> Vec<String> {
        self.runs.iter().map(|e| e.key().clone()).collect()
    }

    pub fn state_store(&self) -> &Arc<dyn StateStore> {
        &self.state_store
    }

    async fn schedule_recurring(
        &self,
        config: JobConfig,
        listener: Arc<dyn JobListener>,
    ) -> JobResult<()> {
        let job_name = config.job_name()?.to_string();
        let expression = config.require(keys::JOB_SCHEDULE)?.to_string();

        // Surface unknown types and bad connector settings now, not on the first tick.
        self.registry.create_source(&config)?;
        self.registry.create_pipeline(&config)?;

        if self.scheduled.contains_key(&job_name) {
            return Err(JobError::AlreadyScheduled(job_name));
        }

        let manager = self.self_ref.clone();
        let config = Arc::new(config);
        let id = self
            .cron
            .add(&expression, move || {
                let manager = manager.clone();
                let config = Arc::clone(&config);
                let listener = Arc::clone(&listener);
                async move {
                    let Some(manager) = manager.upgrade() else { return };
                    manager.fire_trigger(&config, listener).await;
                }
            })
            .await?;

        if let Some(previous) = self.scheduled.insert(job_name.clone(), id) {
            // Lost a race with a concurrent schedule of the same name.
            self.scheduled.insert(job_name.clone(), previous);
            self.cron.remove(&id).await?;
            return Err(JobError::AlreadyScheduled(job_name));
        }

        tracing::info!(job_name = %job_name, schedule = %expression, "Job scheduled");
        Ok(())
    }

    async fn fire_trigger(self: Arc<Self>, config: &JobConfig, listener: Arc<dyn JobListener>) {
        if self.ensure_accepting().is_err() {
            return;
        }
        match self.begin_run(config.clone(), listener).await {
            Ok((run, source)) => self.execute_run(run, source).await,
            Err(JobError::AlreadyRunning(job_name)) => {
                tracing::info!(job_name = %job_name, "Previous run still active; skipping trigger");
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to start scheduled job run");
            }
        }
    }

    /// Create the run record and its collaborators, claiming a concurrency slot.
    async fn begin_run(
        &self,
        config: JobConfig,
        listener: Arc<dyn JobListener>,
    ) -> JobResult<(Arc<JobRun>, Box<dyn Source>)> {
        let job_name = config.job_name()?.to_string();
        let retry_policy = config.retry_policy(&self.defaults.retry_policy)?;
        let timeout = config.task_timeout(self.defaults.task_timeout)?;
        let source = self.registry.create_source(&config)?;
        let pipeline = self.registry.create_pipeline(&config)?;

        let allow_concurrent = config.allow_concurrent_runs()?;
        if !self.concurrency.try_acquire(&job_name, allow_concurrent).await {
            return Err(JobError::AlreadyRunning(job_name));
        }

        let sequence = self.run_seq.fetch_add(1, Ordering::Relaxed);
        let job_id = format!(
            "job_{}_{}_{}",
            job_name,
            Timestamp::now().as_millisecond(),
            sequence
        );
        let state = JobState::new(&job_name, &job_id, config.props().clone());

        let run = Arc::new(JobRun {
            job_id: job_id.clone(),
            job_name,
            config,
            listener,
            pipeline,
            retry_policy,
            timeout,
            cancellation_token: CancellationToken::new(),
            accounting: Mutex::new(RunAccounting {
                state,
                expected: None,
                has_failure: false,
                finalized: false,
            }),
        });
        self.runs.insert(job_id, Arc::clone(&run));
        Ok((run, source))
    }

    async fn execute_run(self: Arc<Self>, run: Arc<JobRun>, source: Box<dyn Source>) {
        let span = tracing::info_span!("job_run", job_name = %run.job_name, job_id = %run.job_id);
        async {
            tracing::info!("Job run started");

            let previous = match self.state_store.get(&run.job_name).await {
                Ok(previous) => previous,
                Err(e) => {
                    tracing::warn!(error = %e, "Could not read previous job state");
                    None
                }
            };
            if let Some(previous) = &previous {
                run.accounting().state.watermarks = previous.watermarks.clone();
            }

            let work_units = match source.work_units(&run.config, previous.as_ref()).await {
                Ok(units) => units,
                Err(e) => {
                    tracing::error!(error = %e, "Source failed to produce work units");
                    let claimed = {
                        let mut accounting = run.accounting();
                        accounting.state.error = Some(JobError::Source(e.to_string()).to_string());
                        accounting.has_failure = true;
                        accounting.expected = Some(0);
                        JobRun::claim_finalize(&mut accounting)
                    };
                    if claimed {
                        self.finalize_run(&run).await;
                    }
                    return;
                }
            };

            {
                let mut accounting = run.accounting();
                accounting.state.state = RunningState::Running;
                accounting.state.total_tasks = work_units.len();
            }
            tracing::info!(work_units = work_units.len(), "Dispatching work units");

            let summary = self
                .dispatcher
                .dispatch(DispatchRequest {
                    job_id: run.job_id.clone(),
                    work_units,
                    pipeline: Arc::clone(&run.pipeline),
                    retry_policy: run.retry_policy.clone(),
                    timeout: run.timeout,
                    cancellation_token: run.cancellation_token.clone(),
                })
                .await;

            let claimed = {
                let mut accounting = run.accounting();
                // Units skipped by a cancellation never became tasks.
                accounting.state.total_tasks = summary.dispatched();
                accounting.expected = Some(summary.dispatched());
                JobRun::claim_finalize(&mut accounting)
            };
            if claimed {
                self.finalize_run(&run).await;
            }
        }
        .instrument(span)
        .await
    }

    /// Job-level commit, persistence and the single listener notification.
    async fn finalize_run(&self, run: &Arc<JobRun>) {
        let (mut state, has_failure) = {
            let accounting = run.accounting();
            (accounting.state.clone(), accounting.has_failure)
        };

        let aborted = run.cancellation_token.is_cancelled();
        let mut publish_failed = false;

        if !aborted {
            for task in state
                .task_states
                .iter_mut()
                .filter(|t| t.working_state == WorkingState::Committed)
            {
                if let Err(e) = run.pipeline.publish(task).await {
                    tracing::error!(
                        job_id = %run.job_id,
                        task_id = %task.task_id,
                        error = %e,
                        "Failed to publish task output"
                    );
                    task.working_state = WorkingState::Failed;
                    task.error = Some(format!("publish failed: {}", e));
                    publish_failed = true;
                }
            }
        }

        if !aborted {
            state.record_watermarks();
        }

        state.state = if aborted {
            RunningState::Aborted
        } else if has_failure || publish_failed {
            RunningState::Failed
        } else {
            RunningState::Committed
        };
        state.end_time = Some(Timestamp::now());

        tracing::info!(
            job_name = %state.job_name,
            job_id = %state.job_id,
            state = %state.state,
            completed = state.completed_tasks,
            committed = state.committed_tasks(),
            failed = state.failed_tasks(),
            duration_ms = state.duration_ms().unwrap_or_default(),
            "Job run finished"
        );

        if let Err(e) = self.state_store.put(&state).await {
            tracing::error!(job_id = %state.job_id, error = %e, "Failed to persist job state");
        }

        self.concurrency.release(&run.job_name).await;

        let notified = AssertUnwindSafe(run.listener.job_completed(&state))
            .catch_unwind()
            .await;
        if notified.is_err() {
            tracing::error!(job_id = %state.job_id, "Job listener panicked");
        }

        // A run stays active until its listener has returned.
        self.runs.remove(&run.job_id);
        if self.runs.is_empty() {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.runs.is_empty() {
                return;
            }
            idle.await;
        }
    }
}

#[async_trait]
impl TaskCompletionListener for JobManager {
    async fn on_task_completed(&self, task: TaskState) {
        let run = self
            .runs
            .get(&task.job_id)
            .map(|entry| Arc::clone(entry.value()));
        let Some(run) = run else {
            tracing::warn!(
                task_id = %task.task_id,
                job_id = %task.job_id,
                "Terminal task for an unknown or finished job run"
            );
            return;
        };

        let claimed = {
            let mut accounting = run.accounting();
            if accounting.finalized {
                tracing::warn!(task_id = %task.task_id, "Task reported after its run finalized");
                return;
            }
            if task.working_state == WorkingState::Failed {
                accounting.has_failure = true;
            }
            accounting.state.completed_tasks += 1;
            accounting.state.task_states.push(task);
            JobRun::claim_finalize(&mut accounting)
        };

        if claimed {
            self.finalize_run(&run).await;
        }
    }
}

#[async_trait]
impl Service for JobManager {
    fn name(&self) -> &'static str {
        "job-manager"
    }

    async fn start(self: Arc<Self>) -> JobResult<()> {
        self.cron.start().await?;
        self.accepting.store(true, Ordering::Release);
        tracing::info!("Job manager started");
        Ok(())
    }

    /// Stop triggers, abort active runs and wait until each has notified
    /// its listener.
    async fn stop(&self) -> JobResult<()> {
        self.accepting.store(false, Ordering::Release);
        self.scheduled.clear();
        if let Err(e) = self.cron.shutdown().await {
            tracing::error!(error = %e, "Failed to shut down cron trigger");
        }

        for entry in self.runs.iter() {
            entry.value().cancellation_token.cancel();
        }
        self.wait_idle().await;

        tracing::info!("Job manager stopped");
        Ok(())
    }
}
