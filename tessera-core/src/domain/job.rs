//! Job domain types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::artifact::{ArtifactRef, ObjectRef};
use crate::domain::batch::{BatchProgress, ChildSummary};

/// Job record
///
/// Structure shared between the submission service (creates), the dispatcher
/// (advances individual and child jobs) and the aggregator (summarises parents).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub kind: JobKind,
    pub owner_id: String,
    pub status: JobStatus,
    pub input: JsonValue,
    pub output: Option<JobOutput>,
    pub error: Option<JobFailure>,
    pub parent_id: Option<Uuid>,
    #[serde(default)]
    pub child_ids: Vec<Uuid>,
    pub batch_index: Option<u32>,
    pub max_concurrent: Option<u32>,
    pub progress: Option<BatchProgress>,
    pub attempt_count: u32,
    pub revision: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Creates a standalone job in `Pending`
    pub fn individual(owner_id: impl Into<String>, input: JsonValue) -> Self {
        Self::pending(Uuid::new_v4(), JobKind::Individual, owner_id.into(), input)
    }

    /// Creates a batch parent with its child ids pre-populated
    ///
    /// The parent's input holds the shared parameters; per-item inputs live on
    /// the children.
    pub fn batch_parent(
        owner_id: impl Into<String>,
        shared_params: JsonValue,
        child_ids: Vec<Uuid>,
        max_concurrent: u32,
    ) -> Self {
        let total = child_ids.len() as u32;
        let mut job = Self::pending(
            Uuid::new_v4(),
            JobKind::BatchParent,
            owner_id.into(),
            shared_params,
        );
        job.child_ids = child_ids;
        job.max_concurrent = Some(max_concurrent);
        job.progress = Some(BatchProgress::new(total));
        job
    }

    /// Creates one child of a batch at `batch_index`
    pub fn batch_child(
        id: Uuid,
        parent_id: Uuid,
        owner_id: impl Into<String>,
        input: JsonValue,
        batch_index: u32,
    ) -> Self {
        let mut job = Self::pending(id, JobKind::BatchChild, owner_id.into(), input);
        job.parent_id = Some(parent_id);
        job.batch_index = Some(batch_index);
        job
    }

    fn pending(id: Uuid, kind: JobKind, owner_id: String, input: JsonValue) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            owner_id,
            status: JobStatus::Pending,
            input,
            output: None,
            error: None,
            parent_id: None,
            child_ids: Vec::new(),
            batch_index: None,
            max_concurrent: None,
            progress: None,
            attempt_count: 0,
            revision: 0,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Whether `caller` may see this job
    pub fn is_owned_by(&self, caller: &str) -> bool {
        self.owner_id == caller
    }
}

/// What a job represents in the batch hierarchy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Individual,
    BatchParent,
    BatchChild,
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobKind::Individual => write!(f, "Individual"),
            JobKind::BatchParent => write!(f, "BatchParent"),
            JobKind::BatchChild => write!(f, "BatchChild"),
        }
    }
}

/// Job lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Persisted, no dispatch message yet (or held back by admission control)
    Pending,
    /// A dispatch message is in the queue
    Queued,
    /// A worker holds the job and is invoking the executor
    Running,
    Completed,
    Failed,
    /// Batch parents only: some children completed, some failed
    PartiallyCompleted,
    Cancelled,
}

impl JobStatus {
    /// Terminal statuses never transition again
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed
                | JobStatus::Failed
                | JobStatus::PartiallyCompleted
                | JobStatus::Cancelled
        )
    }

    /// Whether `self -> next` is a legal edge of the lifecycle for `kind`
    ///
    /// `Running -> Queued` is the transient-retry edge and only exists for jobs
    /// that are actually dispatched. `Pending -> Failed` records a child that
    /// could never be dispatched. Batch parents never run themselves; their
    /// status follows their children.
    pub fn can_transition_to(self, next: JobStatus, kind: JobKind) -> bool {
        use JobStatus::*;

        match kind {
            JobKind::BatchParent => matches!(
                (self, next),
                (Pending, Queued)
                    | (Pending | Queued, Running)
                    | (
                        Pending | Queued | Running,
                        Completed | Failed | PartiallyCompleted | Cancelled
                    )
            ),
            JobKind::Individual | JobKind::BatchChild => matches!(
                (self, next),
                (Pending, Queued | Failed | Cancelled)
                    | (Queued, Running | Failed | Cancelled)
                    | (Running, Completed | Failed | Queued | Cancelled)
            ),
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "Pending"),
            JobStatus::Queued => write!(f, "Queued"),
            JobStatus::Running => write!(f, "Running"),
            JobStatus::Completed => write!(f, "Completed"),
            JobStatus::Failed => write!(f, "Failed"),
            JobStatus::PartiallyCompleted => write!(f, "PartiallyCompleted"),
            JobStatus::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Result of a completed job
///
/// Small results are inlined in `result`; larger ones are written to the
/// object store and referenced by `result_ref`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobOutput {
    #[serde(default)]
    pub result: Option<JsonValue>,
    #[serde(default)]
    pub result_ref: Option<ObjectRef>,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    /// Per-child detail, populated on batch parents only
    #[serde(default)]
    pub children: Vec<ChildSummary>,
}

/// Recorded reason for a `Failed` job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    pub class: FailureClass,
    pub code: String,
    pub message: String,
    /// Attempt during which the failure happened (0 for batch parents)
    pub attempt: u32,
}

/// Where a failure came from and whether it could have been retried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureClass {
    /// Retryable executor failure that ran out of attempts
    Transient,
    /// Non-retryable executor failure
    Permanent,
    /// The dispatch message could not be enqueued
    Dispatch,
    /// Every child of a batch failed or was cancelled
    Batch,
}
