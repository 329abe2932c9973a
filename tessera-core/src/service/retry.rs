//! Failure classification and retry policy

use std::time::Duration;

use crate::config::EngineConfig;
use crate::domain::job::FailureClass;
use crate::ports::executor::ExecutorError;

/// Decides whether an executor failure is worth another attempt
///
/// This is the only place that knows which failures are transient. Queue
/// technology and executor transport never influence the answer.
pub fn classify_failure(error: &ExecutorError) -> FailureClass {
    match error {
        ExecutorError::Timeout | ExecutorError::Unavailable(_) | ExecutorError::RateLimited => {
            FailureClass::Transient
        }
        ExecutorError::InvalidInput(_) | ExecutorError::Internal(_) => FailureClass::Permanent,
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: config.retry_base_delay,
            max_delay: config.retry_max_delay,
        }
    }

    /// Whether a failure on attempt `attempt` (1-based) gets another try
    pub fn should_retry(&self, class: FailureClass, attempt: u32) -> bool {
        class == FailureClass::Transient && attempt < self.max_attempts
    }

    /// Delay before attempt `attempt + 1`
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1 << exponent)
            .min(self.max_delay)
    }
}
