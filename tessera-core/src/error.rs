//! Engine error types

use thiserror::Error;
use uuid::Uuid;

use crate::ports::objects::ObjectStoreError;
use crate::ports::queue::QueueError;
use crate::ports::store::StoreError;

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, OrchestrationError>;

/// Errors surfaced by the submission service, the orchestration facade and
/// the dispatcher
///
/// Executor failures are recorded on the job and observed by polling.
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// Malformed or oversized input, rejected before anything is persisted
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("owner {owner_id} already has {limit} active jobs")]
    QuotaExceeded { owner_id: String, limit: u32 },

    #[error("job {0} not found")]
    NotFound(Uuid),

    /// The job exists but belongs to another owner
    #[error("job {0} belongs to another owner")]
    Forbidden(Uuid),

    /// A conditional update kept losing races
    #[error("conflicting update: {0}")]
    Conflict(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Objects(#[from] ObjectStoreError),
}
