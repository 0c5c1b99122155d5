pub mod config;
pub mod dispatcher;
pub mod error;
pub mod executor;
pub mod lifecycle;
pub mod listener;
pub mod manager;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod state;
pub mod state_store;
pub mod tasks;
pub mod tracker;
pub mod types;


pub use config::JobConfig;
pub use dispatcher::{DispatchRequest, DispatchSummary, WorkUnitManager};
pub use error::{JobError, JobResult, TaskExecutionError};
pub use executor::{ExecutorConfig, TaskExecutor};
pub use lifecycle::{LifecycleState, Service, ServiceManager};
pub use listener::{CompletionSignal, JobListener, LoggingListener};
pub use manager::{ConcurrencyTracker, JobManager, ManagerDefaults};
pub use registry::JobRegistry;
pub use retry::RetryPolicy;
pub use scheduler::CronTrigger;
pub use state::{JobState, RunningState, TaskState, WorkUnit, WorkingState};
pub use state_store::{FsStateStore, MemoryStateStore, StateStore};
pub use tracker::{TaskStateTracker, TrackerConfig};
pub use types::{Source, Task, TaskContext, TaskOutput, TaskPipeline};
