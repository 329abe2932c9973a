//! Tessera HTTP Client
//!
//! A type-safe HTTP client for the Tessera orchestration API.
//!
//! # Example
//!
//! ```no_run
//! use tessera_client::TesseraClient;
//! use tessera_core::dto::job::SubmitJob;
//!
//! #[tokio::main]
//! async fn main() -> tessera_client::Result<()> {
//!     let client = TesseraClient::new("http://localhost:8080", "alice");
//!
//!     let receipt = client
//!         .submit_job(SubmitJob {
//!             input: serde_json::json!({ "sequence": "MKTAYIAK" }),
//!         })
//!         .await?;
//!
//!     let job = client.get_job(receipt.job_id).await?;
//!     println!("Job {} is {:?}", job.id, job.status);
//!     Ok(())
//! }
//! ```

pub mod error;
mod batches;
mod jobs;

// Re-export commonly used types
pub use error::{ClientError, Result};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// Header carrying the caller's identity
pub const OWNER_HEADER: &str = "x-owner-id";

/// HTTP client for the Tessera orchestration API
///
/// Every request is made on behalf of one owner.
#[derive(Debug, Clone)]
pub struct TesseraClient {
    /// Base URL of the orchestrator (e.g., "http://localhost:8080")
    base_url: String,
    owner_id: String,
    /// HTTP client instance
    client: Client,
}

impl TesseraClient {
    /// Create a new client acting as `owner_id`
    ///
    /// # Example
    /// ```
    /// use tessera_client::TesseraClient;
    ///
    /// let client = TesseraClient::new("http://localhost:8080", "alice");
    /// ```
    pub fn new(base_url: impl Into<String>, owner_id: impl Into<String>) -> Self {
        Self::with_client(base_url, owner_id, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(
        base_url: impl Into<String>,
        owner_id: impl Into<String>,
        client: Client,
    ) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            owner_id: owner_id.into(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header(OWNER_HEADER, &self.owner_id)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header(OWNER_HEADER, &self.owner_id)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Handle an API response and deserialize JSON
    ///
    /// This method checks the status code and returns an appropriate error if
    /// the request failed, or deserializes the response body if successful.
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("Request failed with status {}: {}", status, error_text);
            return Err(ClientError::from_body(status.as_u16(), &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }
}
