//! In-memory task queue

use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::time::Instant;
use uuid::Uuid;

use crate::ports::queue::{DispatchMessage, Lease, LeaseToken, MessageId, QueueError, TaskQueue};

struct Entry {
    id: MessageId,
    message: DispatchMessage,
    seq: u64,
    visible_at: Instant,
    lease: Option<LeaseToken>,
    delivery_count: u32,
}

#[derive(Default)]
struct QueueState {
    entries: Vec<Entry>,
    next_seq: u64,
}

/// In-memory implementation of TaskQueue
///
/// Visibility uses `tokio::time::Instant`, so tests can drive redelivery
/// with a paused clock.
#[derive(Default)]
pub struct MemoryTaskQueue {
    state: Mutex<QueueState>,
    unavailable: AtomicBool,
}

impl MemoryTaskQueue {
    /// Creates an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of messages not yet acked (leased or not)
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every message not yet acked, in enqueue order
    pub fn messages(&self) -> Vec<DispatchMessage> {
        let state = self.state.lock().unwrap();
        let mut entries: Vec<&Entry> = state.entries.iter().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.message).collect()
    }

    /// Removes every message, returning them in enqueue order
    pub fn drain(&self) -> Vec<DispatchMessage> {
        let messages = self.messages();
        self.state.lock().unwrap().entries.clear();
        messages
    }

    /// Makes subsequent enqueues fail, simulating a backend outage
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn with_lease<T>(
        &self,
        token: LeaseToken,
        f: impl FnOnce(&mut QueueState, usize) -> T,
    ) -> Result<T, QueueError> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();
        let index = state
            .entries
            .iter()
            .position(|e| e.lease == Some(token) && e.visible_at > now)
            .ok_or(QueueError::LeaseLost(token))?;
        Ok(f(&mut state, index))
    }
}

#[async_trait]
impl TaskQueue for MemoryTaskQueue {
    async fn enqueue(
        &self,
        message: DispatchMessage,
        delay: Option<Duration>,
    ) -> Result<MessageId, QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Backend("task queue unavailable".into()));
        }

        let mut state = self.state.lock().unwrap();
        let id = MessageId(Uuid::new_v4());
        let seq = state.next_seq;
        state.next_seq += 1;
        state.entries.push(Entry {
            id,
            message,
            seq,
            visible_at: Instant::now() + delay.unwrap_or_default(),
            lease: None,
            delivery_count: 0,
        });
        Ok(id)
    }

    async fn lease(&self, visibility_timeout: Duration) -> Result<Option<Lease>, QueueError> {
        let mut state = self.state.lock().unwrap();
        let now = Instant::now();

        let Some(entry) = state
            .entries
            .iter_mut()
            .filter(|e| e.visible_at <= now)
            .min_by_key(|e| e.seq)
        else {
            return Ok(None);
        };

        let token = LeaseToken(Uuid::new_v4());
        entry.lease = Some(token);
        entry.visible_at = now + visibility_timeout;
        entry.delivery_count += 1;

        Ok(Some(Lease {
            token,
            message_id: entry.id,
            message: entry.message,
            delivery_count: entry.delivery_count,
        }))
    }

    async fn extend_lease(
        &self,
        token: LeaseToken,
        extension: Duration,
    ) -> Result<(), QueueError> {
        self.with_lease(token, |state, index| {
            state.entries[index].visible_at = Instant::now() + extension;
        })
    }

    async fn ack(&self, token: LeaseToken) -> Result<(), QueueError> {
        self.with_lease(token, |state, index| {
            state.entries.remove(index);
        })
    }

    async fn nack(&self, token: LeaseToken, delay: Option<Duration>) -> Result<(), QueueError> {
        self.with_lease(token, |state, index| {
            let entry = &mut state.entries[index];
            entry.lease = None;
            entry.visible_at = Instant::now() + delay.unwrap_or_default();
        })
    }
}
