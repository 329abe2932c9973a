//! Task queue port
//!
//! At-least-once delivery of dispatch messages with lease-based visibility:
//! a leased message stays hidden from other consumers until its visibility
//! timeout elapses, and reappears (with a higher delivery count) if it is
//! neither acked nor extended in time.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::ports::BoxError;

/// Errors raised by task queue adapters
#[derive(Debug, Error)]
pub enum QueueError {
    /// The lease expired and the message may already belong to another consumer
    #[error("lease {0} is no longer held")]
    LeaseLost(LeaseToken),

    #[error("task queue backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Queue payload instructing a worker to process one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchMessage {
    pub job_id: Uuid,
}

/// Identifier of an enqueued message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(pub Uuid);

/// Proof of holding a leased message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeaseToken(pub Uuid);

impl std::fmt::Display for LeaseToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message handed to one consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub token: LeaseToken,
    pub message_id: MessageId,
    pub message: DispatchMessage,
    /// 1 on first delivery
    pub delivery_count: u32,
}

/// Queue trait for dispatch messages
#[async_trait]
pub trait TaskQueue: Send + Sync {
    /// Enqueues a message, visible after `delay` (immediately if `None`)
    async fn enqueue(
        &self,
        message: DispatchMessage,
        delay: Option<Duration>,
    ) -> Result<MessageId, QueueError>;

    /// Leases the next visible message, hiding it for `visibility_timeout`
    async fn lease(&self, visibility_timeout: Duration) -> Result<Option<Lease>, QueueError>;

    /// Pushes the lease deadline to `now + extension`
    async fn extend_lease(&self, token: LeaseToken, extension: Duration)
    -> Result<(), QueueError>;

    /// Removes the message for good
    async fn ack(&self, token: LeaseToken) -> Result<(), QueueError>;

    /// Releases the lease; the message becomes visible again after `delay`
    async fn nack(&self, token: LeaseToken, delay: Option<Duration>) -> Result<(), QueueError>;
}
