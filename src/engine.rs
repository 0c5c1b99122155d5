//! Wiring of the scheduling services into one startable engine.

use std::sync::Arc;
use std::time::Duration;

use crate::config::{Settings, StateStoreBackend, StateStoreConfig};
use crate::jobs::{
    ExecutorConfig, FsStateStore, JobManager, JobRegistry, JobResult, LifecycleState,
    ManagerDefaults, MemoryStateStore, ServiceManager, StateStore, TaskExecutor,
    TaskStateTracker, TrackerConfig, WorkUnitManager,
};

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub executor: ExecutorConfig,
    pub tracker: TrackerConfig,
    pub defaults: ManagerDefaults,
    /// Upper bound for each service's stop stage.
    pub shutdown_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            executor: ExecutorConfig::default(),
            tracker: TrackerConfig::default(),
            defaults: ManagerDefaults::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Executor, tracker, work unit manager and job manager, started in that
/// order and stopped in reverse.
pub struct Engine {
    executor: Arc<TaskExecutor>,
    tracker: Arc<TaskStateTracker>,
    manager: Arc<JobManager>,
    services: ServiceManager,
}

impl Engine {
    pub fn new(
        options: EngineOptions,
        registry: JobRegistry,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        let (executor, events) = TaskExecutor::new(options.executor);
        let executor = Arc::new(executor);
        let tracker = Arc::new(TaskStateTracker::new(
            options.tracker,
            Arc::clone(&executor),
            events,
        ));
        let dispatcher = Arc::new(WorkUnitManager::new(
            Arc::clone(&executor),
            Arc::clone(&tracker),
        ));
        let manager = JobManager::new(
            Arc::clone(&dispatcher),
            &tracker,
            Arc::new(registry),
            state_store,
            options.defaults,
        );

        let services = ServiceManager::new(options.shutdown_timeout)
            .with_service(executor.clone())
            .with_service(tracker.clone())
            .with_service(dispatcher)
            .with_service(manager.clone());

        Self {
            executor,
            tracker,
            manager,
            services,
        }
    }

    /// Build an engine with the built-in connectors from loaded settings.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::from_settings_with_registry(settings, JobRegistry::with_defaults())
    }

    pub fn from_settings_with_registry(settings: &Settings, registry: JobRegistry) -> Self {
        let state_store = build_state_store(&settings.state_store);
        Self::new(settings.engine.to_options(), registry, state_store)
    }

    pub async fn start(&self) -> JobResult<()> {
        self.services.start().await
    }

    pub async fn stop(&self) -> JobResult<()> {
        self.services.stop().await
    }

    pub async fn state(&self) -> LifecycleState {
        self.services.state().await
    }

    pub fn manager(&self) -> &Arc<JobManager> {
        &self.manager
    }

    pub fn executor(&self) -> &Arc<TaskExecutor> {
        &self.executor
    }

    pub fn tracker(&self) -> &Arc<TaskStateTracker> {
        &self.tracker
    }

    pub fn service_names(&self) -> Vec<&'static str> {
        self.services.service_names()
    }
}

pub fn build_state_store(config: &StateStoreConfig) -> Arc<dyn StateStore> {
    match config.backend {
        StateStoreBackend::Fs => Arc::new(FsStateStore::new(&config.directory)),
        StateStoreBackend::Memory => Arc::new(MemoryStateStore::new()),
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down");
        },
    }
}
