//! Task state tracking: retries, finalization and completion routing.
//!
//! The executor reports every attempt's outcome through a [`TaskEvent`]
//! channel. The tracker drains it on `pool_core_size` dispatcher loops and
//! handles each finished attempt on a spawned task bounded by
//! `pool_max_size` permits, so a slow job commit never stalls the workers.
//!
//! ```text
//! PENDING -> RUNNING -> COMMITTED
//!                    -> (retryable, budget left) PENDING -> RUNNING ...
//!                    -> FAILED
//! ```

use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use jiff::Timestamp;
use tokio::sync::{Mutex as AsyncMutex, Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::jobs::error::{JobError, JobResult};
use crate::jobs::executor::{TaskEvent, TaskEvents, TaskExecutor, TaskReport};
use crate::jobs::lifecycle::Service;
use crate::jobs::state::{TaskState, WorkingState};
use crate::jobs::types::{Task, TaskOutput};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub pool_core_size: usize,
    pub pool_max_size: usize,
    pub poll_interval: Duration,
    /// Running attempts older than this are logged as stalled.
    pub stall_threshold: Duration,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            pool_core_size: 2,
            pool_max_size: 4,
            poll_interval: Duration::from_secs(1),
            stall_threshold: Duration::from_secs(300),
        }
    }
}

/// Receives every task exactly once, after it reached a terminal state.
#[async_trait]
pub trait TaskCompletionListener: Send + Sync {
    async fn on_task_completed(&self, state: TaskState);
}

/// Snapshot of a registered, not yet terminal task.
#[derive(Debug, Clone)]
pub struct TrackedTask {
    pub task_id: String,
    pub job_id: String,
    pub working_state: WorkingState,
    pub attempt: u32,
    pub registered_at: Instant,
    pub attempt_started_at: Option<Instant>,
    stall_reported: bool,
}

struct TrackerRuntime {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct TaskStateTracker {
    config: TrackerConfig,
    executor: Arc<TaskExecutor>,
    events: Arc<AsyncMutex<TaskEvents>>,
    registered: DashMap<String, TrackedTask>,
    permits: Arc<Semaphore>,
    drained: Notify,
    listener: OnceLock<Weak<dyn TaskCompletionListener>>,
    runtime: Mutex<Option<TrackerRuntime>>,
}

impl TaskStateTracker {
    pub fn new(config: TrackerConfig, executor: Arc<TaskExecutor>, events: TaskEvents) -> Self {
        let permits = Arc::new(Semaphore::new(config.pool_max_size.max(1)));
        Self {
            config,
            executor,
            events: Arc::new(AsyncMutex::new(events)),
            registered: DashMap::new(),
            permits,
            drained: Notify::new(),
            listener: OnceLock::new(),
            runtime: Mutex::new(None),
        }
    }

    /// Route terminal task states to `listener`. Only the first call wins.
    pub fn set_completion_listener(&self, listener: Weak<dyn TaskCompletionListener>) -> bool {
        self.listener.set(listener).is_ok()
    }

    /// Begin monitoring a task before it is handed to the executor.
    pub fn register_task(&self, task: &Task) {
        self.registered.insert(
            task.state.task_id.clone(),
            TrackedTask {
                task_id: task.state.task_id.clone(),
                job_id: task.state.job_id.clone(),
                working_state: task.state.working_state,
                attempt: task.state.retries,
                registered_at: Instant::now(),
                attempt_started_at: None,
                stall_reported: false,
            },
        );
    }

    /// Forget a task that was never submitted.
    pub fn deregister(&self, task_id: &str) -> bool {
        let removed = self.registered.remove(task_id).is_some();
        if removed && self.registered.is_empty() {
            self.drained.notify_waiters();
        }
        removed
    }

    pub fn tracked_tasks(&self) -> Vec<TrackedTask> {
        self.registered.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Finalize a task as FAILED without running it, e.g. when it could not
    /// be handed to the executor.
    pub async fn fail_task(&self, mut task: Task, error: impl Display) {
        tracing::warn!(
            task_id = %task.state.task_id,
            job_id = %task.state.job_id,
            error = %error,
            "Task failed before execution"
        );
        task.state.working_state = WorkingState::Failed;
        task.state.error = Some(error.to_string());
        self.finalize(task.state).await;
    }

    /// Resolves once no registered task is waiting for a terminal state.
    async fn wait_drained(&self) {
        loop {
            let drained = self.drained.notified();
            if self.registered.is_empty() {
                return;
            }
            drained.await;
        }
    }

    fn runtime(&self) -> MutexGuard<'_, Option<TrackerRuntime>> {
        self.runtime.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn dispatch_loop(self: Arc<Self>, shutdown: CancellationToken) {
        loop {
            let event = {
                let mut events = self.events.lock().await;
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => None,
                    event = events.recv() => event,
                }
            };

            match event {
                Some(TaskEvent::Started { task_id, attempt }) => {
                    if let Some(mut tracked) = self.registered.get_mut(&task_id) {
                        tracked.working_state = WorkingState::Running;
                        tracked.attempt = attempt;
                        tracked.attempt_started_at = Some(Instant::now());
                        tracked.stall_reported = false;
                    }
                }
                Some(TaskEvent::Finished(report)) => {
                    let permit = match Arc::clone(&self.permits).acquire_owned().await {
                        Ok(permit) => permit,
                        Err(_) => break,
                    };
                    let tracker = Arc::clone(&self);
                    tokio::spawn(async move {
                        tracker.handle_report(report).await;
                        drop(permit);
                    });
                }
                None => break,
            }
        }
    }

    async fn handle_report(self: Arc<Self>, report: TaskReport) {
        let TaskReport { mut task, outcome } = report;

        match outcome {
            Ok(output) => {
                Self::apply_output(&mut task.state, output);
                task.state.working_state = WorkingState::Committed;
                task.state.error = None;
                tracing::debug!(
                    task_id = %task.state.task_id,
                    attempt = task.state.retries,
                    records = task.state.records_written,
                    "Task committed"
                );
                self.finalize(task.state).await;
            }
            Err(e)
                if e.is_retryable()
                    && task.retry_policy.allows_retry(task.state.retries)
                    && !task.cancellation_token.is_cancelled() =>
            {
                task.state.retries += 1;
                task.state.working_state = WorkingState::Pending;
                task.state.error = Some(e.to_string());
                let delay = task.retry_policy.delay_for(task.state.retries - 1);

                if let Some(mut tracked) = self.registered.get_mut(&task.state.task_id) {
                    tracked.working_state = WorkingState::Pending;
                    tracked.attempt = task.state.retries;
                    tracked.attempt_started_at = None;
                }

                tracing::info!(
                    task_id = %task.state.task_id,
                    retry = task.state.retries,
                    max_retries = task.retry_policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Retrying task"
                );

                let tracker = Arc::clone(&self);
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    if let Err(rejected) = tracker.executor.submit(task).await {
                        let reason = rejected.reason;
                        let error = JobError::dispatch(&rejected.task.state.task_id, reason);
                        tracker.fail_task(*rejected.task, error).await;
                    }
                });
            }
            Err(e) => {
                tracing::warn!(
                    task_id = %task.state.task_id,
                    retries = task.state.retries,
                    error = %e,
                    "Task failed"
                );
                task.state.working_state = WorkingState::Failed;
                task.state.error = Some(e.to_string());
                self.finalize(task.state).await;
            }
        }
    }

    fn apply_output(state: &mut TaskState, output: TaskOutput) {
        state.records_written = output.records_written;
        state.bytes_written = output.bytes_written;
        state.high_watermark = output.high_watermark;
        state.props.extend(output.props);
    }

    async fn finalize(&self, mut state: TaskState) {
        state.end_time = Some(Timestamp::now());
        self.deregister(&state.task_id);

        match self.listener.get().and_then(Weak::upgrade) {
            Some(listener) => listener.on_task_completed(state).await,
            None => tracing::error!(
                task_id = %state.task_id,
                job_id = %state.job_id,
                "No completion listener; dropping terminal task state"
            ),
        }
    }

    async fn poll_loop(self: Arc<Self>, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => self.poll_once(),
            }
        }
    }

    fn poll_once(&self) {
        let mut running = 0usize;
        for mut entry in self.registered.iter_mut() {
            let tracked = entry.value_mut();
            if tracked.working_state != WorkingState::Running {
                continue;
            }
            running += 1;
            let stalled = tracked
                .attempt_started_at
                .is_some_and(|started| started.elapsed() > self.config.stall_threshold);
            if stalled && !tracked.stall_reported {
                tracked.stall_reported = true;
                tracing::warn!(
                    task_id = %tracked.task_id,
                    job_id = %tracked.job_id,
                    attempt = tracked.attempt,
                    threshold_secs = self.config.stall_threshold.as_secs(),
                    "Task appears stalled"
                );
            }
        }

        if !self.registered.is_empty() {
            tracing::debug!(
                tracked = self.registered.len(),
                running,
                executing = self.executor.active_tasks(),
                "Task tracker poll"
            );
        }
    }
}

#[async_trait]
impl Service for TaskStateTracker {
    fn name(&self) -> &'static str {
        "task-state-tracker"
    }

    async fn start(self: Arc<Self>) -> JobResult<()> {
        let mut runtime = self.runtime();
        if runtime.is_some() {
            return Ok(());
        }
        if self.config.pool_core_size == 0 || self.config.pool_core_size > self.config.pool_max_size {
            return Err(JobError::Startup {
                service: self.name().to_string(),
                message: "pool_core_size must be between 1 and pool_max_size".to_string(),
            });
        }

        let shutdown = CancellationToken::new();
        let mut handles: Vec<JoinHandle<()>> = (0..self.config.pool_core_size)
            .map(|_| tokio::spawn(Arc::clone(&self).dispatch_loop(shutdown.clone())))
            .collect();
        handles.push(tokio::spawn(Arc::clone(&self).poll_loop(shutdown.clone())));

        *runtime = Some(TrackerRuntime { shutdown, handles });

        tracing::info!(
            core = self.config.pool_core_size,
            max = self.config.pool_max_size,
            "Task state tracker started"
        );
        Ok(())
    }

    /// Keeps handling reports until every registered task is terminal, then
    /// stops the loops. If the caller gives up waiting, the loops stay up so
    /// late reports still complete their job runs.
    async fn stop(&self) -> JobResult<()> {
        if self.runtime().is_none() {
            return Ok(());
        }
        if !self.registered.is_empty() {
            tracing::info!(
                tracked = self.registered.len(),
                "Waiting for tracked tasks to finish"
            );
            self.wait_drained().await;
        }

        let runtime = self.runtime().take();
        let Some(runtime) = runtime else {
            return Ok(());
        };
        runtime.shutdown.cancel();
        for handle in runtime.handles {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Tracker loop terminated abnormally");
            }
        }

        // Wait for in-progress report handlers.
        let _ = self
            .permits
            .acquire_many(self.config.pool_max_size.max(1) as u32)
            .await;

        tracing::info!("Task state tracker stopped");
        Ok(())
    }
}
