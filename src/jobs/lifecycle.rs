//! Ordered start/stop of the scheduling services.
//!
//! Services start in the order they were added and stop in reverse. Each stop
//! stage is bounded by the shutdown timeout; a stage that overruns or fails is
//! reported but does not prevent the remaining stages from stopping.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::jobs::error::{JobError, JobResult};

/// A component with an explicit start/stop lifecycle.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &'static str;

    /// Start accepting work. Starting a running service is a no-op.
    async fn start(self: Arc<Self>) -> JobResult<()>;

    /// Stop and release resources. Stopping a stopped service is a no-op.
    async fn stop(&self) -> JobResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Running,
    Stopped,
}

pub struct ServiceManager {
    services: Vec<Arc<dyn Service>>,
    shutdown_timeout: Duration,
    // Held across a whole start or stop so concurrent requests serialize.
    state: Mutex<LifecycleState>,
}

impl ServiceManager {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            services: Vec::new(),
            shutdown_timeout,
            state: Mutex::new(LifecycleState::New),
        }
    }

    /// Append a service; it starts after every service added before it.
    pub fn with_service(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn service_names(&self) -> Vec<&'static str> {
        self.services.iter().map(|s| s.name()).collect()
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.lock().await
    }

    /// Start every service in order.
    ///
    /// If one fails, the services already started are stopped in reverse and
    /// the startup error is returned.
    pub async fn start(&self) -> JobResult<()> {
        let mut state = self.state.lock().await;
        match *state {
            LifecycleState::Running => return Ok(()),
            LifecycleState::Stopped => {
                return Err(JobError::Startup {
                    service: "lifecycle".to_string(),
                    message: "services were already stopped".to_string(),
                });
            }
            LifecycleState::New => {}
        }

        for (index, service) in self.services.iter().enumerate() {
            tracing::info!(service = service.name(), "Starting service");
            if let Err(e) = Arc::clone(service).start().await {
                tracing::error!(service = service.name(), error = %e, "Service failed to start");
                // Best effort; the startup error is what the caller needs.
                let _ = self.stop_services(&self.services[..index]).await;
                *state = LifecycleState::Stopped;
                return Err(JobError::Startup {
                    service: service.name().to_string(),
                    message: e.to_string(),
                });
            }
        }

        *state = LifecycleState::Running;
        tracing::info!(services = self.services.len(), "All services started");
        Ok(())
    }

    /// Stop every service in reverse order. Idempotent.
    pub async fn stop(&self) -> JobResult<()> {
        let mut state = self.state.lock().await;
        if *state != LifecycleState::Running {
            *state = LifecycleState::Stopped;
            return Ok(());
        }
        *state = LifecycleState::Stopped;
        self.stop_services(&self.services).await
    }

    async fn stop_services(&self, services: &[Arc<dyn Service>]) -> JobResult<()> {
        let mut failed = Vec::new();

        for service in services.iter().rev() {
            tracing::info!(service = service.name(), "Stopping service");
            match tokio::time::timeout(self.shutdown_timeout, service.stop()).await {
                Ok(Ok(())) => {
                    tracing::info!(service = service.name(), "Service stopped");
                }
                Ok(Err(e)) => {
                    tracing::error!(service = service.name(), error = %e, "Service failed to stop");
                    failed.push(service.name().to_string());
                }
                Err(_) => {
                    tracing::error!(
                        service = service.name(),
                        timeout_ms = self.shutdown_timeout.as_millis() as u64,
                        "Service did not stop in time"
                    );
                    failed.push(service.name().to_string());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(JobError::ShutdownTimeout {
                services: failed,
                timeout_ms: self.shutdown_timeout.as_millis() as u64,
            })
        }
    }
}
