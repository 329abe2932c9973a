//! Job Submission Service
//!
//! Validates requests, creates job records, materializes batch hierarchies
//! and enqueues dispatch messages.

use chrono::Utc;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::job::{FailureClass, Job, JobFailure, JobStatus};
use crate::dto::batch::{BatchReceipt, SubmitBatch};
use crate::error::{OrchestrationError, Result};
use crate::ports::queue::{DispatchMessage, TaskQueue};
use crate::ports::store::{JobPatch, Precondition, StateStore};
use crate::service::aggregator::BatchAggregator;

/// Creates jobs and hands them to the task queue
pub struct SubmissionService {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn TaskQueue>,
    aggregator: BatchAggregator,
    config: Arc<EngineConfig>,
}

impl SubmissionService {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn TaskQueue>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let aggregator = BatchAggregator::new(store.clone(), queue.clone(), config.clone());
        Self {
            store,
            queue,
            aggregator,
            config,
        }
    }

    /// Creates one individual job and enqueues its dispatch message
    ///
    /// Both the record and the message exist before this returns.
    pub async fn submit_individual(&self, owner_id: &str, input: JsonValue) -> Result<Uuid> {
        validate_owner(owner_id)?;
        validate_input(&input, self.config.max_input_bytes)?;
        self.check_quota(owner_id).await?;

        let job = Job::individual(owner_id, input);
        self.store.create(&job).await?;
        release_job(self.store.as_ref(), self.queue.as_ref(), &job).await?;

        info!("Job created: {} for owner: {}", job.id, owner_id);

        Ok(job.id)
    }

    /// Creates a batch parent and one child per item
    ///
    /// The parent is persisted before any child message is enqueued. Only the
    /// first `max_concurrent` children are enqueued here; the rest stay
    /// `Pending` until the aggregator admits them.
    pub async fn submit_batch(&self, owner_id: &str, req: SubmitBatch) -> Result<BatchReceipt> {
        validate_owner(owner_id)?;

        let SubmitBatch {
            shared_params,
            items,
            max_concurrent,
        } = req;

        if items.is_empty() {
            return Err(OrchestrationError::Validation(
                "batch must contain at least one item".to_string(),
            ));
        }

        if items.len() > self.config.max_batch_items {
            return Err(OrchestrationError::Validation(format!(
                "batch has {} items, limit is {}",
                items.len(),
                self.config.max_batch_items
            )));
        }

        if !shared_params.is_object() {
            return Err(OrchestrationError::Validation(
                "shared_params must be a JSON object".to_string(),
            ));
        }

        let max_concurrent = max_concurrent.unwrap_or(self.config.default_max_concurrent);
        if max_concurrent == 0 {
            return Err(OrchestrationError::Validation(
                "max_concurrent must be greater than 0".to_string(),
            ));
        }

        let inputs = items
            .into_iter()
            .enumerate()
            .map(|(index, item)| {
                let merged = merge_params(&shared_params, item).map_err(|msg| {
                    OrchestrationError::Validation(format!("item {}: {}", index, msg))
                })?;
                validate_input(&merged, self.config.max_input_bytes).map_err(|e| match e {
                    OrchestrationError::Validation(msg) => {
                        OrchestrationError::Validation(format!("item {}: {}", index, msg))
                    }
                    other => other,
                })?;
                Ok(merged)
            })
            .collect::<Result<Vec<_>>>()?;

        self.check_quota(owner_id).await?;

        let child_ids: Vec<Uuid> = inputs.iter().map(|_| Uuid::new_v4()).collect();
        let parent = Job::batch_parent(owner_id, shared_params, child_ids.clone(), max_concurrent);
        let children: Vec<Job> = child_ids
            .iter()
            .zip(inputs)
            .enumerate()
            .map(|(index, (id, input))| {
                Job::batch_child(*id, parent.id, owner_id, input, index as u32)
            })
            .collect();

        self.store.create(&parent).await?;
        self.store.create_many(&children).await?;

        let eager = (max_concurrent as usize).min(children.len());
        for child in &children[..eager] {
            if let Err(err) = release_job(self.store.as_ref(), self.queue.as_ref(), child).await {
                error!("Failed to dispatch batch {}: {}", parent.id, err);
                self.abandon_undispatched(&parent, &children).await;
                return Err(err);
            }
        }

        self.store
            .conditional_update(
                parent.id,
                Precondition::status(JobStatus::Pending),
                JobPatch::status(JobStatus::Queued),
            )
            .await?;

        info!(
            "Batch created: {} with {} children ({} dispatched) for owner: {}",
            parent.id,
            children.len(),
            eager,
            owner_id
        );

        Ok(BatchReceipt {
            batch_id: parent.id,
            child_ids,
        })
    }

    async fn check_quota(&self, owner_id: &str) -> Result<()> {
        let limit = self.config.max_active_jobs_per_owner;
        let active = self.store.count_active(owner_id).await?;

        if active >= limit as u64 {
            return Err(OrchestrationError::QuotaExceeded {
                owner_id: owner_id.to_string(),
                limit,
            });
        }

        Ok(())
    }

    /// Fails every child that never got a message, then settles the parent
    async fn abandon_undispatched(&self, parent: &Job, children: &[Job]) {
        let failure = JobFailure {
            class: FailureClass::Dispatch,
            code: "batch_dispatch_aborted".to_string(),
            message: "batch dispatch was aborted after a queue failure".to_string(),
            attempt: 0,
        };

        for child in children {
            let patch = JobPatch::status(JobStatus::Failed)
                .with_error(failure.clone())
                .completed_at(Utc::now());
            if let Err(e) = self
                .store
                .conditional_update(child.id, Precondition::status(JobStatus::Pending), patch)
                .await
            {
                warn!("Failed to abandon child {}: {}", child.id, e);
            }
        }

        if let Err(e) = self.aggregator.refresh(parent.id).await {
            warn!("Failed to settle abandoned batch {}: {}", parent.id, e);
        }
    }
}

/// Moves a `Pending` job to `Queued` and enqueues its dispatch message
///
/// Returns `false` when another actor already moved the job out of
/// `Pending` (released it, or cancelled it). The status change happens
/// before the enqueue so a consumer never sees a message for a job that is
/// not yet `Queued`; if the enqueue fails the job is recorded as `Failed`.
pub(crate) async fn release_job(
    store: &dyn StateStore,
    queue: &dyn TaskQueue,
    job: &Job,
) -> Result<bool> {
    let queued = store
        .conditional_update(
            job.id,
            Precondition::status(JobStatus::Pending),
            JobPatch::status(JobStatus::Queued),
        )
        .await?;

    if !queued {
        return Ok(false);
    }

    match queue.enqueue(DispatchMessage { job_id: job.id }, None).await {
        Ok(_) => Ok(true),
        Err(err) => {
            error!("Failed to enqueue job {}: {}", job.id, err);

            let failure = JobFailure {
                class: FailureClass::Dispatch,
                code: "enqueue_failed".to_string(),
                message: err.to_string(),
                attempt: job.attempt_count,
            };
            let patch = JobPatch::status(JobStatus::Failed)
                .with_error(failure)
                .completed_at(Utc::now());

            if let Err(store_err) = store
                .conditional_update(job.id, Precondition::status(JobStatus::Queued), patch)
                .await
            {
                error!("Failed to record dispatch failure for {}: {}", job.id, store_err);
            }

            Err(err.into())
        }
    }
}

// =============================================================================
// Validation
// =============================================================================

fn validate_owner(owner_id: &str) -> Result<()> {
    if owner_id.trim().is_empty() {
        return Err(OrchestrationError::Validation(
            "Owner ID cannot be empty".to_string(),
        ));
    }

    if owner_id.len() > 255 {
        return Err(OrchestrationError::Validation(
            "Owner ID is too long (max 255 characters)".to_string(),
        ));
    }

    Ok(())
}

fn validate_input(input: &JsonValue, max_bytes: usize) -> Result<()> {
    if !input.is_object() {
        return Err(OrchestrationError::Validation(
            "input must be a JSON object".to_string(),
        ));
    }

    let size = serde_json::to_vec(input)
        .map_err(|e| OrchestrationError::Validation(format!("input is not serializable: {}", e)))?
        .len();

    if size > max_bytes {
        return Err(OrchestrationError::Validation(format!(
            "input is {} bytes, limit is {}",
            size, max_bytes
        )));
    }

    Ok(())
}

/// Overlays one batch item on the shared parameters; item keys win
fn merge_params(shared: &JsonValue, item: JsonValue) -> std::result::Result<JsonValue, String> {
    let JsonValue::Object(item) = item else {
        return Err("item must be a JSON object".to_string());
    };

    let mut merged = shared.as_object().cloned().unwrap_or_default();
    merged.extend(item);
    Ok(JsonValue::Object(merged))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::store::{JobFilter, PageRequest};
    use crate::service::test_support::Harness;
    use serde_json::json;

    #[test]
    fn test_merge_params_item_wins() {
        let merged = merge_params(
            &json!({"model": "v1", "recycles": 3}),
            json!({"sequence": "MKT", "recycles": 10}),
        )
        .unwrap();
        assert_eq!(merged, json!({"model": "v1", "recycles": 10, "sequence": "MKT"}));
    }

    #[test]
    fn test_merge_params_rejects_non_object() {
        assert!(merge_params(&json!({}), json!([1, 2])).is_err());
    }

    #[test]
    fn test_validate_input() {
        assert!(validate_input(&json!({"a": 1}), 100).is_ok());
        assert!(validate_input(&json!("text"), 100).is_err());
        assert!(validate_input(&json!({"a": "x".repeat(200)}), 100).is_err());
    }

    #[test]
    fn test_validate_owner() {
        assert!(validate_owner("alice").is_ok());
        assert!(validate_owner("  ").is_err());
        assert!(validate_owner(&"a".repeat(256)).is_err());
    }

    #[tokio::test]
    async fn test_submit_individual_creates_one_job_and_one_message() {
        let h = Harness::new();

        let job_id = h
            .submission()
            .submit_individual("alice", json!({"sequence": "MKT"}))
            .await
            .unwrap();

        assert_eq!(h.store.len(), 1);
        assert_eq!(h.queue.messages(), vec![DispatchMessage { job_id }]);
        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Queued);
        assert_eq!(job.owner_id, "alice");
    }

    #[tokio::test]
    async fn test_invalid_input_persists_nothing() {
        let h = Harness::new();

        let err = h
            .submission()
            .submit_individual("alice", json!([1, 2, 3]))
            .await
            .unwrap_err();

        assert!(matches!(err, OrchestrationError::Validation(_)));
        assert!(h.store.is_empty());
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_quota_exceeded() {
        let h = Harness::with_config(|c| c.max_active_jobs_per_owner = 2);
        let submission = h.submission();

        submission.submit_individual("alice", json!({})).await.unwrap();
        submission.submit_individual("alice", json!({})).await.unwrap();
        let err = submission.submit_individual("alice", json!({})).await.unwrap_err();

        assert!(matches!(err, OrchestrationError::QuotaExceeded { limit: 2, .. }));
        assert!(submission.submit_individual("bob", json!({})).await.is_ok());
    }

    #[tokio::test]
    async fn test_submit_batch_materializes_hierarchy() {
        let h = Harness::new();

        let receipt = h
            .submission()
            .submit_batch(
                "alice",
                SubmitBatch {
                    shared_params: json!({"model": "v1"}),
                    items: vec![json!({"seq": "A"}), json!({"seq": "B"}), json!({"seq": "C"})],
                    max_concurrent: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(h.store.len(), 4);

        let parent = h.job(receipt.batch_id).await;
        assert_eq!(parent.child_ids, receipt.child_ids);
        assert_eq!(parent.child_ids.len(), 3);
        assert_eq!(parent.progress.unwrap().total, 3);
        assert_eq!(parent.status, JobStatus::Queued);

        let children = h
            .store
            .query(&JobFilter::children_of(parent.id), PageRequest::first(10))
            .await
            .unwrap()
            .items;
        let ids: Vec<Uuid> = children.iter().map(|c| c.id).collect();
        assert_eq!(ids, receipt.child_ids);
        assert_eq!(children[1].input, json!({"model": "v1", "seq": "B"}));
        assert_eq!(children[2].batch_index, Some(2));
        assert_eq!(h.queue.len(), 3);
    }

    #[tokio::test]
    async fn test_submit_batch_holds_children_beyond_limit() {
        let h = Harness::new();

        let receipt = h
            .submission()
            .submit_batch(
                "alice",
                SubmitBatch {
                    shared_params: json!({}),
                    items: vec![json!({}), json!({}), json!({})],
                    max_concurrent: Some(1),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            h.queue.messages(),
            vec![DispatchMessage {
                job_id: receipt.child_ids[0]
            }]
        );
        assert_eq!(h.job(receipt.child_ids[1]).await.status, JobStatus::Pending);
        assert_eq!(h.job(receipt.child_ids[2]).await.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_submit_batch_validation() {
        let h = Harness::new();
        let submission = h.submission();

        let empty = SubmitBatch {
            shared_params: json!({}),
            items: vec![],
            max_concurrent: None,
        };
        assert!(matches!(
            submission.submit_batch("alice", empty).await,
            Err(OrchestrationError::Validation(_))
        ));

        let zero_limit = SubmitBatch {
            shared_params: json!({}),
            items: vec![json!({})],
            max_concurrent: Some(0),
        };
        assert!(matches!(
            submission.submit_batch("alice", zero_limit).await,
            Err(OrchestrationError::Validation(_))
        ));

        let bad_item = SubmitBatch {
            shared_params: json!({}),
            items: vec![json!({}), json!(42)],
            max_concurrent: None,
        };
        let err = submission.submit_batch("alice", bad_item).await.unwrap_err();
        assert!(matches!(err, OrchestrationError::Validation(msg) if msg.starts_with("item 1")));

        assert!(h.store.is_empty());
    }
}
