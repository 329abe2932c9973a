//! Compute executor port
//!
//! The remote environment that runs the prediction model for one job.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

/// Executor failures
///
/// Whether a failure is worth retrying is decided in one place,
/// [`crate::service::retry::classify_failure`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("executor invocation timed out")]
    Timeout,

    #[error("executor unavailable: {0}")]
    Unavailable(String),

    #[error("executor rate limit reached")]
    RateLimited,

    #[error("input rejected by model: {0}")]
    InvalidInput(String),

    #[error("executor failed: {0}")]
    Internal(String),
}

impl ExecutorError {
    /// Stable machine-readable code recorded on failed jobs
    pub fn code(&self) -> &'static str {
        match self {
            ExecutorError::Timeout => "timeout",
            ExecutorError::Unavailable(_) => "executor_unavailable",
            ExecutorError::RateLimited => "rate_limited",
            ExecutorError::InvalidInput(_) => "invalid_input",
            ExecutorError::Internal(_) => "executor_error",
        }
    }
}

/// Everything the executor needs to run one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub job_id: Uuid,
    pub input: JsonValue,
    /// 1-based attempt number
    pub attempt: u32,
}

/// Successful execution output
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Structured result payload
    pub output: JsonValue,
    /// Files produced by the model (structures, reports)
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
}

/// A file produced by an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub path: String,
    pub content: Vec<u8>,
}

/// Service trait for running one job on remote compute
#[async_trait]
pub trait ComputeExecutor: Send + Sync {
    /// Runs the model for one job
    ///
    /// The caller imposes the timeout; implementations may also return
    /// [`ExecutorError::Timeout`] on their own.
    async fn invoke(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError>;
}
