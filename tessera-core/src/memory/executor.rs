//! Scripted compute executor

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use crate::ports::executor::{ComputeExecutor, ExecutionRequest, ExecutionResult, ExecutorError};

/// Executor that replays scripted outcomes
///
/// Outcomes queued with [`ScriptedExecutor::then`] are returned first, in
/// order; afterwards every invocation returns the fallback outcome.
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Result<ExecutionResult, ExecutorError>>>,
    fallback: Result<ExecutionResult, ExecutorError>,
    delay: Duration,
    requests: Mutex<Vec<ExecutionRequest>>,
}

impl ScriptedExecutor {
    /// Every invocation succeeds with `output`
    pub fn succeeding(output: JsonValue) -> Self {
        Self::with_fallback(Ok(ExecutionResult {
            output,
            artifacts: Vec::new(),
        }))
    }

    /// Every invocation fails with `error`
    pub fn failing(error: ExecutorError) -> Self {
        Self::with_fallback(Err(error))
    }

    pub fn with_fallback(fallback: Result<ExecutionResult, ExecutorError>) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: Duration::ZERO,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queues one outcome ahead of the fallback
    pub fn then(self, outcome: Result<ExecutionResult, ExecutorError>) -> Self {
        self.script.lock().unwrap().push_back(outcome);
        self
    }

    /// Makes every invocation take `delay`
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Number of invocations so far
    pub fn invocations(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<ExecutionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ComputeExecutor for ScriptedExecutor {
    async fn invoke(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError> {
        self.requests.lock().unwrap().push(request.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
