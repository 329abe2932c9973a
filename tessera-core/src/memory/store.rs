//! In-memory state store

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::job::{Job, JobKind};
use crate::dto::page::Page;
use crate::ports::store::{JobFilter, JobPatch, PageRequest, Precondition, StateStore, StoreError};

/// In-memory implementation of StateStore
#[derive(Default)]
pub struct MemoryStateStore {
    jobs: Mutex<HashMap<Uuid, Job>>,
}

impl MemoryStateStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores `job` as is, replacing any record with the same ID
    #[cfg(test)]
    pub(crate) fn overwrite(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.id, job);
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.id) {
            return Err(StoreError::Duplicate(job.id));
        }
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn create_many(&self, batch: &[Job]) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = batch.iter().find(|job| jobs.contains_key(&job.id)) {
            return Err(StoreError::Duplicate(existing.id));
        }
        for job in batch {
            jobs.insert(job.id, job.clone());
        }
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.jobs.lock().unwrap().get(&id).cloned())
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected: Precondition,
        patch: JobPatch,
    ) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(&id) {
            Some(job) if expected.holds_for(job) && expected.permits(&patch, job.kind) => {
                patch.apply(job, chrono::Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn query(&self, filter: &JobFilter, page: PageRequest) -> Result<Page<Job>, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let mut matching: Vec<Job> = jobs.values().filter(|j| filter.matches(j)).cloned().collect();

        if filter.parent_id.is_some() {
            matching.sort_by_key(|j| j.batch_index);
        } else {
            matching.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        }

        let rows = matching
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize + 1)
            .collect();

        Ok(page.paginate(rows))
    }

    async fn count_active(&self, owner_id: &str) -> Result<u64, StoreError> {
        let jobs = self.jobs.lock().unwrap();
        let count = jobs
            .values()
            .filter(|j| j.owner_id == owner_id && !j.status.is_terminal())
            .filter(|j| match j.kind {
                JobKind::Individual | JobKind::BatchParent => true,
                JobKind::BatchChild => false,
            })
            .count();
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::JobStatus;
    use serde_json::json;

    #[tokio::test]
    async fn test_create_rejects_duplicates() {
        let store = MemoryStateStore::new();
        let job = Job::individual("alice", json!({}));
        store.create(&job).await.unwrap();
        assert!(matches!(store.create(&job).await, Err(StoreError::Duplicate(_))));
    }

    #[tokio::test]
    async fn test_conditional_update_only_once() {
        let store = MemoryStateStore::new();
        let mut job = Job::individual("alice", json!({}));
        job.status = JobStatus::Queued;
        store.create(&job).await.unwrap();

        let expected = Precondition::status(JobStatus::Queued);
        let first = store
            .conditional_update(job.id, expected, JobPatch::status(JobStatus::Running))
            .await
            .unwrap();
        let second = store
            .conditional_update(job.id, expected, JobPatch::status(JobStatus::Running))
            .await
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.get(job.id).await.unwrap().unwrap().revision, 1);
    }

    #[tokio::test]
    async fn test_conditional_update_rejects_illegal_transition() {
        let store = MemoryStateStore::new();
        let mut job = Job::individual("alice", json!({}));
        job.status = JobStatus::Completed;
        store.create(&job).await.unwrap();

        let reopened = store
            .conditional_update(
                job.id,
                Precondition::exact(JobStatus::Completed, 0),
                JobPatch::status(JobStatus::Queued),
            )
            .await
            .unwrap();

        assert!(!reopened);
        let stored = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Completed);
        assert_eq!(stored.revision, 0);
    }

    #[tokio::test]
    async fn test_conditional_update_missing_job() {
        let store = MemoryStateStore::new();
        let updated = store
            .conditional_update(
                Uuid::new_v4(),
                Precondition::status(JobStatus::Queued),
                JobPatch::status(JobStatus::Running),
            )
            .await
            .unwrap();
        assert!(!updated);
    }

    #[tokio::test]
    async fn test_children_come_back_in_batch_order() {
        let store = MemoryStateStore::new();
        let parent_id = Uuid::new_v4();
        let children: Vec<Job> = (0..5)
            .rev()
            .map(|i| Job::batch_child(Uuid::new_v4(), parent_id, "alice", json!({}), i))
            .collect();
        store.create_many(&children).await.unwrap();

        let first = store
            .query(&JobFilter::children_of(parent_id), PageRequest::first(3))
            .await
            .unwrap();
        let indexes: Vec<_> = first.items.iter().map(|j| j.batch_index.unwrap()).collect();
        assert_eq!(indexes, vec![0, 1, 2]);

        let next = PageRequest::from_token(first.next_page_token.as_deref(), 3).unwrap();
        let second = store.query(&JobFilter::children_of(parent_id), next).await.unwrap();
        let indexes: Vec<_> = second.items.iter().map(|j| j.batch_index.unwrap()).collect();
        assert_eq!(indexes, vec![3, 4]);
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn test_count_active_ignores_children_and_terminal() {
        let store = MemoryStateStore::new();
        let active = Job::individual("alice", json!({}));
        let mut done = Job::individual("alice", json!({}));
        done.status = JobStatus::Completed;
        let child = Job::batch_child(Uuid::new_v4(), Uuid::new_v4(), "alice", json!({}), 0);
        let other = Job::individual("bob", json!({}));

        store.create_many(&[active, done, child, other]).await.unwrap();

        assert_eq!(store.count_active("alice").await.unwrap(), 1);
    }
}
