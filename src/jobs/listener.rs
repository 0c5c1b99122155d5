use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::jobs::state::{JobState, RunningState};

/// Callback notified exactly once per job run with the final state.
#[async_trait]
pub trait JobListener: Send + Sync {
    async fn job_completed(&self, state: &JobState);
}

/// One-shot completion signal, the awaitable flavour of [`JobListener`].
pub struct CompletionSignal {
    sender: Mutex<Option<oneshot::Sender<JobState>>>,
}

impl CompletionSignal {
    pub fn new() -> (Self, oneshot::Receiver<JobState>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }
}

#[async_trait]
impl JobListener for CompletionSignal {
    async fn job_completed(&self, state: &JobState) {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            Some(tx) => {
                if tx.send(state.clone()).is_err() {
                    tracing::debug!(job_id = %state.job_id, "Completion receiver dropped");
                }
            }
            None => {
                tracing::warn!(
                    job_id = %state.job_id,
                    "Completion signal fired more than once; ignoring"
                );
            }
        }
    }
}

/// Listener that only logs the outcome; used for recurring runs started
/// from the command line.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingListener;

#[async_trait]
impl JobListener for LoggingListener {
    async fn job_completed(&self, state: &JobState) {
        match state.state {
            RunningState::Committed => tracing::info!(
                job_name = %state.job_name,
                job_id = %state.job_id,
                tasks = state.completed_tasks,
                duration_ms = state.duration_ms().unwrap_or_default(),
                "Job committed"
            ),
            other => tracing::warn!(
                job_name = %state.job_name,
                job_id = %state.job_id,
                state = %other,
                committed = state.committed_tasks(),
                failed = state.failed_tasks(),
                error = state.error.as_deref().unwrap_or(""),
                "Job did not commit"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[tokio::test]
    async fn test_completion_signal_delivers_once() {
        let (signal, rx) = CompletionSignal::new();
        let mut state = JobState::new("a", "job_a_1_0", BTreeMap::new());
        state.state = RunningState::Committed;

        signal.job_completed(&state).await;
        // Second delivery is dropped instead of panicking.
        signal.job_completed(&state).await;

        let received = rx.await.unwrap();
        assert_eq!(received.job_id, "job_a_1_0");
        assert_eq!(received.state, RunningState::Committed);
    }

    #[tokio::test]
    async fn test_completion_signal_tolerates_dropped_receiver() {
        let (signal, rx) = CompletionSignal::new();
        drop(rx);
        let state = JobState::new("a", "job_a_1_0", BTreeMap::new());
        signal.job_completed(&state).await;
    }
}
