use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_cron_scheduler::{Job, JobScheduler};
use uuid::Uuid;

use crate::jobs::config::keys;
use crate::jobs::error::{JobError, JobResult};

/// Wrapper around tokio-cron-scheduler for recurring job triggers.
///
/// The underlying scheduler is created on `start`, so triggers can only be
/// added while the owning job manager is running.
#[derive(Clone, Default)]
pub struct CronTrigger {
    scheduler: Arc<Mutex<Option<JobScheduler>>>,
}

impl CronTrigger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn start(&self) -> JobResult<()> {
        let mut guard = self.scheduler.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;
        scheduler
            .start()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))?;

        *guard = Some(scheduler);
        Ok(())
    }

    /// Stop firing triggers. Runs already started are not affected.
    pub async fn shutdown(&self) -> JobResult<()> {
        let scheduler = self.scheduler.lock().await.take();
        let Some(mut scheduler) = scheduler else {
            return Ok(());
        };
        scheduler
            .shutdown()
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))
    }

    /// Invoke `tick` on every firing of the cron `expression`.
    pub async fn add<F, Fut>(&self, expression: &str, tick: F) -> JobResult<Uuid>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let tick = Arc::new(tick);
        let cron_job = Job::new_async(expression, move |_uuid, _lock| {
            let tick = Arc::clone(&tick);
            Box::pin(async move { (*tick)().await })
        })
        .map_err(|e| {
            JobError::config(
                keys::JOB_SCHEDULE,
                format!("invalid cron expression '{}': {}", expression, e),
            )
        })?;

        let guard = self.scheduler.lock().await;
        let scheduler = guard.as_ref().ok_or(JobError::NotRunning("cron-trigger"))?;
        scheduler
            .add(cron_job)
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))
    }

    pub async fn remove(&self, id: &Uuid) -> JobResult<()> {
        let guard = self.scheduler.lock().await;
        let Some(scheduler) = guard.as_ref() else {
            return Ok(());
        };
        scheduler
            .remove(id)
            .await
            .map_err(|e| JobError::Scheduler(e.to_string()))
    }
}
