use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use futures::FutureExt;
use jiff::Timestamp;
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::jobs::error::{JobError, JobResult, TaskExecutionError};
use crate::jobs::lifecycle::Service;
use crate::jobs::state::WorkingState;
use crate::jobs::types::{Task, TaskOutput};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub pool_size: usize,
    pub queue_capacity: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_capacity: 64,
        }
    }
}

/// Progress reported by the executor to the task state tracker
#[derive(Debug)]
pub enum TaskEvent {
    Started {
        task_id: String,
        attempt: u32,
    },
    Finished(TaskReport),
}

/// One finished attempt. The task travels back with its outcome so the
/// tracker can retry or finalize it.
#[derive(Debug)]
pub struct TaskReport {
    pub task: Task,
    pub outcome: Result<TaskOutput, TaskExecutionError>,
}

pub type TaskEvents = mpsc::UnboundedReceiver<TaskEvent>;

/// A task the executor refused; handed back so it can still be accounted for.
#[derive(Debug, Error)]
#[error("{reason}")]
pub struct SubmitError {
    pub task: Box<Task>,
    pub reason: &'static str,
}

struct WorkerPool {
    sender: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
    shutdown: CancellationToken,
}

/// Fixed-size worker pool fed by a bounded queue
pub struct TaskExecutor {
    config: ExecutorConfig,
    events: mpsc::UnboundedSender<TaskEvent>,
    pool: Mutex<Option<WorkerPool>>,
    active: Arc<AtomicUsize>,
}

impl TaskExecutor {
    pub fn new(config: ExecutorConfig) -> (Self, TaskEvents) {
        let (events, rx) = mpsc::unbounded_channel();
        let executor = Self {
            config,
            events,
            pool: Mutex::new(None),
            active: Arc::new(AtomicUsize::new(0)),
        };
        (executor, rx)
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.pool().is_some()
    }

    /// Tasks currently executing on a worker.
    pub fn active_tasks(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Queue a task, waiting for capacity when the queue is full.
    pub async fn submit(&self, task: Task) -> Result<(), SubmitError> {
        let sender = self.pool().as_ref().map(|pool| pool.sender.clone());
        let Some(sender) = sender else {
            return Err(SubmitError {
                task: Box::new(task),
                reason: "task executor is not running",
            });
        };

        sender.send(task).await.map_err(|e| SubmitError {
            task: Box::new(e.0),
            reason: "task executor queue is closed",
        })
    }

    fn pool(&self) -> MutexGuard<'_, Option<WorkerPool>> {
        self.pool.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn worker_loop(
        worker: usize,
        receiver: Arc<AsyncMutex<mpsc::Receiver<Task>>>,
        events: mpsc::UnboundedSender<TaskEvent>,
        active: Arc<AtomicUsize>,
        shutdown: CancellationToken,
    ) {
        tracing::debug!(worker, "Task worker started");

        // Runs until the queue is closed and empty, so every accepted task
        // is reported exactly once.
        loop {
            let next = receiver.lock().await.recv().await;
            let Some(mut task) = next else { break };

            if shutdown.is_cancelled() {
                tracing::warn!(
                    task_id = %task.state.task_id,
                    job_id = %task.state.job_id,
                    "Cancelling queued task on shutdown"
                );
                let outcome = Err(TaskExecutionError::Cancelled);
                Self::report(&events, TaskReport { task, outcome });
                continue;
            }

            task.state.working_state = WorkingState::Running;
            if task.state.start_time.is_none() {
                task.state.start_time = Some(Timestamp::now());
            }
            let _ = events.send(TaskEvent::Started {
                task_id: task.state.task_id.clone(),
                attempt: task.state.retries,
            });

            active.fetch_add(1, Ordering::Relaxed);
            let outcome = Self::run_attempt(&task).await;
            active.fetch_sub(1, Ordering::Relaxed);

            if let Err(e) = &outcome {
                tracing::debug!(
                    worker,
                    task_id = %task.state.task_id,
                    attempt = task.state.retries,
                    error = %e,
                    "Task attempt failed"
                );
            }

            Self::report(&events, TaskReport { task, outcome });
        }

        tracing::debug!(worker, "Task worker stopped");
    }

    fn report(events: &mpsc::UnboundedSender<TaskEvent>, report: TaskReport) {
        if let Err(e) = events.send(TaskEvent::Finished(report)) {
            if let TaskEvent::Finished(report) = e.0 {
                tracing::error!(
                    task_id = %report.task.state.task_id,
                    "Task state tracker is gone; dropping task report"
                );
            }
        }
    }

    /// Run one pipeline attempt. Panics and timeouts become task errors.
    async fn run_attempt(task: &Task) -> Result<TaskOutput, TaskExecutionError> {
        if task.cancellation_token.is_cancelled() {
            return Err(TaskExecutionError::Cancelled);
        }

        let ctx = task.context();
        let pipeline = Arc::clone(&task.pipeline);
        let attempt = AssertUnwindSafe(async move { pipeline.run(&ctx).await }).catch_unwind();

        let result = match task.timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt).await {
                Ok(result) => result,
                Err(_) => return Err(TaskExecutionError::Timeout(limit.as_secs())),
            },
            None => attempt.await,
        };

        result.unwrap_or_else(|panic| Err(TaskExecutionError::Panicked(panic_message(panic.as_ref()))))
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[async_trait]
impl Service for TaskExecutor {
    fn name(&self) -> &'static str {
        "task-executor"
    }

    async fn start(self: Arc<Self>) -> JobResult<()> {
        let mut pool = self.pool();
        if pool.is_some() {
            return Ok(());
        }
        if self.config.pool_size == 0 || self.config.queue_capacity == 0 {
            return Err(JobError::Startup {
                service: self.name().to_string(),
                message: "pool size and queue capacity must be positive".to_string(),
            });
        }

        let (sender, receiver) = mpsc::channel(self.config.queue_capacity);
        let receiver = Arc::new(AsyncMutex::new(receiver));
        let shutdown = CancellationToken::new();

        let workers = (0..self.config.pool_size)
            .map(|worker| {
                tokio::spawn(Self::worker_loop(
                    worker,
                    Arc::clone(&receiver),
                    self.events.clone(),
                    Arc::clone(&self.active),
                    shutdown.clone(),
                ))
            })
            .collect();

        *pool = Some(WorkerPool {
            sender,
            workers,
            shutdown,
        });

        tracing::info!(
            pool_size = self.config.pool_size,
            queue_capacity = self.config.queue_capacity,
            "Task executor started"
        );
        Ok(())
    }

    async fn stop(&self) -> JobResult<()> {
        let pool = self.pool().take();
        let Some(pool) = pool else {
            return Ok(());
        };
        let WorkerPool {
            sender,
            workers,
            shutdown,
        } = pool;

        // Closing the queue lets workers exit once it is empty. In-flight
        // attempts finish; tasks still queued are reported as cancelled.
        shutdown.cancel();
        drop(sender);

        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Task worker terminated abnormally");
            }
        }

        tracing::info!("Task executor stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::retry::RetryPolicy;
    use crate::jobs::state::{TaskState, WorkUnit};
    use crate::jobs::types::{TaskContext, TaskPipeline};
    use crate::jobs::config::JobConfig;
    use std::time::Duration;

    #[derive(Debug)]
    enum Behavior {
        Succeed,
        Panic,
        Slow,
        Hang,
    }

    #[derive(Debug)]
    struct StubPipeline(Behavior);

    #[async_trait]
    impl TaskPipeline for StubPipeline {
        fn pipeline_type() -> &'static str {
            "stub"
        }

        fn from_config(_config: &JobConfig) -> JobResult<Self> {
            Ok(Self(Behavior::Succeed))
        }

        async fn run(&self, _ctx: &TaskContext) -> Result<TaskOutput, TaskExecutionError> {
            match self.0 {
                Behavior::Succeed => Ok(TaskOutput {
                    records_written: 1,
                    ..TaskOutput::default()
                }),
                Behavior::Panic => panic!("pipeline blew up"),
                Behavior::Slow => {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    Ok(TaskOutput::default())
                }
                Behavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(TaskOutput::default())
                }
            }
        }

        async fn publish(&self, _task: &TaskState) -> Result<(), TaskExecutionError> {
            Ok(())
        }
    }

    fn task(id: &str, behavior: Behavior) -> Task {
        Task::new(
            id.to_string(),
            "job_t_1_0".to_string(),
            WorkUnit::new(),
            Arc::new(StubPipeline(behavior)),
            RetryPolicy::none(),
        )
    }

    async fn next_report(events: &mut TaskEvents) -> TaskReport {
        loop {
            match events.recv().await.unwrap() {
                TaskEvent::Started { .. } => continue,
                TaskEvent::Finished(report) => return report,
            }
        }
    }

    #[tokio::test]
    async fn test_submit_before_start_is_rejected() {
        let (executor, _events) = TaskExecutor::new(ExecutorConfig::default());
        let err = executor.submit(task("t0", Behavior::Succeed)).await.unwrap_err();
        assert_eq!(err.task.state.task_id, "t0");
        assert!(!executor.is_running());
    }

    #[tokio::test]
    async fn test_successful_attempt_is_reported() {
        let (executor, mut events) = TaskExecutor::new(ExecutorConfig::default());
        let executor = Arc::new(executor);
        Arc::clone(&executor).start().await.unwrap();

        executor.submit(task("t0", Behavior::Succeed)).await.unwrap();
        let report = next_report(&mut events).await;

        assert_eq!(report.task.state.working_state, WorkingState::Running);
        assert!(report.task.state.start_time.is_some());
        assert_eq!(report.outcome.unwrap().records_written, 1);

        executor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_panic_does_not_kill_the_pool() {
        let config = ExecutorConfig {
            pool_size: 1,
            queue_capacity: 4,
        };
        let (executor, mut events) = TaskExecutor::new(config);
        let executor = Arc::new(executor);
        Arc::clone(&executor).start().await.unwrap();

        executor.submit(task("boom", Behavior::Panic)).await.unwrap();
        let report = next_report(&mut events).await;
        assert!(matches!(report.outcome, Err(TaskExecutionError::Panicked(ref m)) if m.contains("blew up")));

        // The single worker survived and still runs tasks.
        executor.submit(task("ok", Behavior::Succeed)).await.unwrap();
        let report = next_report(&mut events).await;
        assert_eq!(report.task.state.task_id, "ok");
        assert!(report.outcome.is_ok());

        executor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_attempt_timeout() {
        let (executor, mut events) = TaskExecutor::new(ExecutorConfig::default());
        let executor = Arc::new(executor);
        Arc::clone(&executor).start().await.unwrap();

        let hanging = task("slow", Behavior::Hang).with_timeout(Some(Duration::from_millis(50)));
        executor.submit(hanging).await.unwrap();

        let report = next_report(&mut events).await;
        assert!(matches!(report.outcome, Err(TaskExecutionError::Timeout(_))));

        executor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_task_is_not_run() {
        let (executor, mut events) = TaskExecutor::new(ExecutorConfig::default());
        let executor = Arc::new(executor);
        Arc::clone(&executor).start().await.unwrap();

        let token = CancellationToken::new();
        token.cancel();
        executor
            .submit(task("c", Behavior::Hang).with_cancellation(token))
            .await
            .unwrap();

        let report = next_report(&mut events).await;
        assert_eq!(report.outcome.unwrap_err(), TaskExecutionError::Cancelled);

        executor.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_is_idempotent_and_rejects_new_work() {
        let (executor, _events) = TaskExecutor::new(ExecutorConfig::default());
        let executor = Arc::new(executor);
        Arc::clone(&executor).start().await.unwrap();

        executor.stop().await.unwrap();
        executor.stop().await.unwrap();
        assert!(executor.submit(task("late", Behavior::Succeed)).await.is_err());
    }

    #[tokio::test]
    async fn test_stop_reports_queued_tasks_as_cancelled() {
        let config = ExecutorConfig {
            pool_size: 1,
            queue_capacity: 4,
        };
        let (executor, mut events) = TaskExecutor::new(config);
        let executor = Arc::new(executor);
        Arc::clone(&executor).start().await.unwrap();

        executor.submit(task("running", Behavior::Slow)).await.unwrap();
        executor.submit(task("queued-1", Behavior::Succeed)).await.unwrap();
        executor.submit(task("queued-2", Behavior::Succeed)).await.unwrap();
        match events.recv().await.unwrap() {
            TaskEvent::Started { task_id, .. } => assert_eq!(task_id, "running"),
            other => panic!("expected a start event, got {:?}", other),
        }

        executor.stop().await.unwrap();

        let mut reports = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let TaskEvent::Finished(report) = event {
                reports.push(report);
            }
        }
        assert_eq!(reports.len(), 3);
        assert_eq!(reports[0].task.state.task_id, "running");
        assert!(reports[0].outcome.is_ok());
        for report in &reports[1..] {
            assert_eq!(report.outcome, Err(TaskExecutionError::Cancelled));
        }
    }
}
