//! State store port
//!
//! Durable, indexable job records with conditional (optimistic) updates.
//! The store is the single source of truth: every cross-process decision
//! (claiming a job, releasing a held child, writing batch progress) is a
//! conditional update keyed on the previously observed status and, where a
//! lost update matters, the record revision.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::batch::BatchProgress;
use crate::domain::job::{Job, JobFailure, JobKind, JobOutput, JobStatus};
use crate::dto::page::Page;
use crate::ports::BoxError;

/// Errors raised by state store adapters
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("job {0} already exists")]
    Duplicate(Uuid),

    #[error("failed to encode job record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("state store backend error: {0}")]
    Backend(#[source] BoxError),
}

/// Repository trait for job records
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Persists a new job record
    async fn create(&self, job: &Job) -> Result<(), StoreError>;

    /// Persists several records atomically (all or none)
    async fn create_many(&self, jobs: &[Job]) -> Result<(), StoreError>;

    /// Finds a job by ID
    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Applies `patch` only if the stored record still satisfies `expected`
    ///
    /// Returns `false` when the precondition no longer holds, when the job
    /// does not exist, or when the patched status is not a lifecycle edge
    /// for the record's kind. Callers must re-read and decide; never
    /// overwrite blindly.
    async fn conditional_update(
        &self,
        id: Uuid,
        expected: Precondition,
        patch: JobPatch,
    ) -> Result<bool, StoreError>;

    /// Lists jobs matching `filter`
    ///
    /// Children of a parent are ordered by `batch_index`; everything else by
    /// newest first.
    async fn query(&self, filter: &JobFilter, page: PageRequest) -> Result<Page<Job>, StoreError>;

    /// Counts the owner's non-terminal top-level jobs (individual jobs and
    /// batch parents)
    async fn count_active(&self, owner_id: &str) -> Result<u64, StoreError>;
}

/// Expected state of a record for a conditional update
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Precondition {
    pub status: JobStatus,
    pub revision: Option<u64>,
}

impl Precondition {
    /// Holds while the stored status is `status`
    pub fn status(status: JobStatus) -> Self {
        Self {
            status,
            revision: None,
        }
    }

    /// Holds only while the record is exactly as it was read
    pub fn exact(status: JobStatus, revision: u64) -> Self {
        Self {
            status,
            revision: Some(revision),
        }
    }

    /// Evaluates the precondition against a record
    pub fn holds_for(&self, job: &Job) -> bool {
        job.status == self.status && self.revision.is_none_or(|r| r == job.revision)
    }

    /// Whether `patch` may be applied to a record of `kind` in this status
    ///
    /// A patch that sets no status, or keeps the current one, always may.
    /// A status change must be an edge of the job lifecycle.
    pub fn permits(&self, patch: &JobPatch, kind: JobKind) -> bool {
        match patch.status {
            Some(next) if next != self.status => self.status.can_transition_to(next, kind),
            _ => true,
        }
    }

    /// The job kinds for which [`Precondition::permits`] allows `patch`
    pub fn permitted_kinds(&self, patch: &JobPatch) -> Vec<JobKind> {
        [JobKind::Individual, JobKind::BatchParent, JobKind::BatchChild]
            .into_iter()
            .filter(|kind| self.permits(patch, *kind))
            .collect()
    }
}

/// Partial update of a job record
///
/// `None` fields are left untouched. Applying a patch always bumps the
/// revision and never moves `updated_at` backwards.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobPatch {
    pub status: Option<JobStatus>,
    pub output: Option<JobOutput>,
    pub error: Option<JobFailure>,
    pub attempt_count: Option<u32>,
    pub progress: Option<BatchProgress>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl JobPatch {
    pub fn status(status: JobStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_output(mut self, output: JobOutput) -> Self {
        self.output = Some(output);
        self
    }

    pub fn with_error(mut self, error: JobFailure) -> Self {
        self.error = Some(error);
        self
    }

    pub fn with_attempt_count(mut self, attempt_count: u32) -> Self {
        self.attempt_count = Some(attempt_count);
        self
    }

    pub fn with_progress(mut self, progress: BatchProgress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn started_at(mut self, at: DateTime<Utc>) -> Self {
        self.started_at = Some(at);
        self
    }

    pub fn completed_at(mut self, at: DateTime<Utc>) -> Self {
        self.completed_at = Some(at);
        self
    }

    /// Touches the record without changing any field
    ///
    /// Only `updated_at` and the revision move. A running worker writes one
    /// periodically so a crashed worker can be told apart from a slow one.
    pub fn heartbeat() -> Self {
        Self::default()
    }

    /// Applies the patch to an in-memory record
    pub fn apply(self, job: &mut Job, now: DateTime<Utc>) {
        if let Some(status) = self.status {
            job.status = status;
        }
        if let Some(output) = self.output {
            job.output = Some(output);
        }
        if let Some(error) = self.error {
            job.error = Some(error);
        }
        if let Some(attempt_count) = self.attempt_count {
            job.attempt_count = attempt_count;
        }
        if let Some(progress) = self.progress {
            job.progress = Some(progress);
        }
        if let Some(started_at) = self.started_at {
            job.started_at = Some(started_at);
        }
        if let Some(completed_at) = self.completed_at {
            job.completed_at = Some(completed_at);
        }
        job.updated_at = job.updated_at.max(now);
        job.revision += 1;
    }
}

/// Query filter over job records
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobFilter {
    pub owner_id: Option<String>,
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub parent_id: Option<Uuid>,
    /// Excludes batch children
    pub top_level_only: bool,
}

impl JobFilter {
    /// All children of a batch parent
    pub fn children_of(parent_id: Uuid) -> Self {
        Self {
            parent_id: Some(parent_id),
            ..Self::default()
        }
    }

    /// Individual jobs and batch parents of one owner
    pub fn top_level(owner_id: impl Into<String>) -> Self {
        Self {
            owner_id: Some(owner_id.into()),
            top_level_only: true,
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: Option<JobStatus>) -> Self {
        self.status = status;
        self
    }

    /// Evaluates the filter against a record
    pub fn matches(&self, job: &Job) -> bool {
        if self.owner_id.as_deref().is_some_and(|o| o != job.owner_id) {
            return false;
        }
        if self.status.is_some_and(|s| s != job.status) {
            return false;
        }
        if self.kind.is_some_and(|k| k != job.kind) {
            return false;
        }
        if self.parent_id.is_some() && self.parent_id != job.parent_id {
            return false;
        }
        if self.top_level_only && job.kind == JobKind::BatchChild {
            return false;
        }
        true
    }
}

/// Offset-based page window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

impl PageRequest {
    pub fn first(limit: u32) -> Self {
        Self { offset: 0, limit }
    }

    /// Decodes an opaque page token produced by [`PageRequest::next_token`]
    ///
    /// Returns `None` for tokens this store never issued.
    pub fn from_token(token: Option<&str>, limit: u32) -> Option<Self> {
        let offset = match token {
            None => 0,
            Some(token) => token.strip_prefix("o")?.parse::<u64>().ok()?,
        };
        Some(Self { offset, limit })
    }

    /// Token for the page following this one
    pub fn next_token(&self) -> String {
        format!("o{}", self.offset + self.limit as u64)
    }

    /// Builds a page from up to `limit + 1` fetched rows
    ///
    /// Adapters fetch one extra row to learn whether another page exists.
    pub fn paginate<T>(&self, mut rows: Vec<T>) -> Page<T> {
        let has_more = rows.len() > self.limit as usize;
        rows.truncate(self.limit as usize);
        Page {
            items: rows,
            next_page_token: has_more.then(|| self.next_token()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precondition_checks_revision() {
        let mut job = Job::individual("alice", json!({}));
        job.status = JobStatus::Queued;
        job.revision = 3;

        assert!(Precondition::status(JobStatus::Queued).holds_for(&job));
        assert!(Precondition::exact(JobStatus::Queued, 3).holds_for(&job));
        assert!(!Precondition::exact(JobStatus::Queued, 2).holds_for(&job));
        assert!(!Precondition::status(JobStatus::Running).holds_for(&job));
    }

    #[test]
    fn test_precondition_permits_only_lifecycle_edges() {
        let completed = Precondition::status(JobStatus::Completed);
        assert!(!completed.permits(&JobPatch::status(JobStatus::Queued), JobKind::Individual));
        assert!(completed.permits(&JobPatch::heartbeat(), JobKind::Individual));

        let running = Precondition::status(JobStatus::Running);
        let requeue = JobPatch::status(JobStatus::Queued);
        assert!(running.permits(&requeue, JobKind::BatchChild));
        assert!(!running.permits(&requeue, JobKind::BatchParent));
        assert_eq!(
            running.permitted_kinds(&requeue),
            vec![JobKind::Individual, JobKind::BatchChild]
        );
        assert!(completed.permitted_kinds(&requeue).is_empty());
    }

    #[test]
    fn test_patch_bumps_revision_and_keeps_time_monotonic() {
        let mut job = Job::individual("alice", json!({}));
        let created = job.updated_at;
        let earlier = created - chrono::Duration::seconds(10);

        JobPatch::status(JobStatus::Queued).apply(&mut job, earlier);

        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.revision, 1);
        assert_eq!(job.updated_at, created);
    }

    #[test]
    fn test_filter_top_level_excludes_children() {
        let parent_id = Uuid::new_v4();
        let child = Job::batch_child(Uuid::new_v4(), parent_id, "alice", json!({}), 0);
        let single = Job::individual("alice", json!({}));

        let filter = JobFilter::top_level("alice");
        assert!(!filter.matches(&child));
        assert!(filter.matches(&single));
        assert!(JobFilter::children_of(parent_id).matches(&child));
        assert!(!JobFilter::top_level("bob").matches(&single));
    }

    #[test]
    fn test_page_token_round_trip() {
        let page = PageRequest::first(10);
        let next = PageRequest::from_token(Some(&page.next_token()), 10).unwrap();
        assert_eq!(next.offset, 10);
        assert!(PageRequest::from_token(Some("garbage"), 10).is_none());
    }

    #[test]
    fn test_paginate_detects_more_rows() {
        let page = PageRequest::first(2).paginate(vec![1, 2, 3]);
        assert_eq!(page.items, vec![1, 2]);
        assert_eq!(page.next_page_token.as_deref(), Some("o2"));

        let last = PageRequest::first(2).paginate(vec![1]);
        assert!(last.next_page_token.is_none());
    }
}
