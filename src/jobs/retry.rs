use std::time::Duration;

/// Retry policy applied by the task state tracker.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Re-submissions allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub delay: Duration,
    pub backoff_multiplier: f64,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, delay: Duration, backoff_multiplier: f64, max_delay: Duration) -> Self {
        Self {
            max_retries,
            delay,
            backoff_multiplier,
            max_delay,
        }
    }

    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Whether a task that has already been retried `retries` times may go again.
    pub fn allows_retry(&self, retries: u32) -> bool {
        retries < self.max_retries
    }

    /// Delay before retry number `attempt` (zero based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.delay.as_secs_f64();
        let multiplier = if self.backoff_multiplier.is_finite() {
            self.backoff_multiplier.max(1.0)
        } else {
            1.0
        };
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let delay_secs = base * multiplier.powi(exponent);

        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}
