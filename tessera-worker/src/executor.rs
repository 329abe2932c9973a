//! HTTP compute executor
//!
//! Invokes the prediction model behind `POST {base_url}/invoke`. The request
//! body is the [`ExecutionRequest`]; a 2xx response carries the
//! [`ExecutionResult`]. Non-success statuses are mapped onto
//! [`ExecutorError`] so the dispatcher can decide whether to retry.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::debug;

use tessera_core::ports::executor::{
    ComputeExecutor, ExecutionRequest, ExecutionResult, ExecutorError,
};

/// Compute executor reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    base_url: String,
    client: Client,
}

impl HttpExecutor {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Uses a preconfigured client (timeouts, TLS, proxies)
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Builds a client whose request timeout matches the execution timeout
    pub fn with_timeout(base_url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self::with_client(base_url, client))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl ComputeExecutor for HttpExecutor {
    async fn invoke(&self, request: &ExecutionRequest) -> Result<ExecutionResult, ExecutorError> {
        let url = format!("{}/invoke", self.base_url);
        debug!(
            "Invoking executor for job {} (attempt {})",
            request.job_id, request.attempt
        );

        let response = self
            .client
            .post(&url)
            .json(request)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(status_error(status, message));
        }

        response
            .json::<ExecutionResult>()
            .await
            .map_err(|e| ExecutorError::Internal(format!("malformed executor response: {}", e)))
    }
}

/// Maps a failed HTTP status onto an executor error
fn status_error(status: StatusCode, message: String) -> ExecutorError {
    match status {
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => ExecutorError::Timeout,
        StatusCode::TOO_MANY_REQUESTS => ExecutorError::RateLimited,
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE => {
            ExecutorError::Unavailable(message)
        }
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ExecutorError::InvalidInput(message)
        }
        _ => ExecutorError::Internal(format!("status {}: {}", status.as_u16(), message)),
    }
}

fn transport_error(err: reqwest::Error) -> ExecutorError {
    if err.is_timeout() {
        ExecutorError::Timeout
    } else if err.is_connect() {
        ExecutorError::Unavailable(err.to_string())
    } else {
        ExecutorError::Internal(err.to_string())
    }
}
