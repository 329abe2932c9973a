//! Orchestration facade
//!
//! The operations exposed to callers: submit, query and cancel. Every read
//! is scoped to the calling owner.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::job::{Job, JobKind, JobStatus};
use crate::dto::batch::{BatchReceipt, SubmitBatch};
use crate::dto::job::{JobReceipt, ListJobs, SubmitJob};
use crate::dto::page::{DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT, Page, PageQuery};
use crate::error::{OrchestrationError, Result};
use crate::ports::queue::TaskQueue;
use crate::ports::store::{JobFilter, JobPatch, PageRequest, Precondition, StateStore};
use crate::service::aggregator::{BatchAggregator, load_children};
use crate::service::submission::SubmissionService;

/// Entry point for the Orchestration API
pub struct Orchestrator {
    store: Arc<dyn StateStore>,
    submission: SubmissionService,
    aggregator: BatchAggregator,
    config: Arc<EngineConfig>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn TaskQueue>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            submission: SubmissionService::new(store.clone(), queue.clone(), config.clone()),
            aggregator: BatchAggregator::new(store.clone(), queue, config.clone()),
            store,
            config,
        }
    }

    pub async fn submit_individual(&self, owner_id: &str, req: SubmitJob) -> Result<JobReceipt> {
        let job_id = self.submission.submit_individual(owner_id, req.input).await?;
        Ok(JobReceipt { job_id })
    }

    pub async fn submit_batch(&self, owner_id: &str, req: SubmitBatch) -> Result<BatchReceipt> {
        self.submission.submit_batch(owner_id, req).await
    }

    /// Gets one job of the caller
    pub async fn get_job(&self, owner_id: &str, job_id: Uuid) -> Result<Job> {
        let job = self
            .store
            .get(job_id)
            .await?
            .ok_or(OrchestrationError::NotFound(job_id))?;

        if !job.is_owned_by(owner_id) {
            return Err(OrchestrationError::Forbidden(job_id));
        }

        Ok(job)
    }

    /// Lists the caller's jobs, newest first
    ///
    /// Batch children are only listed when `kind` asks for them.
    pub async fn list_jobs(&self, owner_id: &str, query: &ListJobs) -> Result<Page<Job>> {
        let page = page_request(query.page_token.as_deref(), query.limit)?;

        let filter = match query.kind {
            Some(kind) => JobFilter {
                owner_id: Some(owner_id.to_string()),
                kind: Some(kind),
                ..JobFilter::default()
            },
            None => JobFilter::top_level(owner_id),
        }
        .with_status(query.status);

        Ok(self.store.query(&filter, page).await?)
    }

    /// Lists the children of one of the caller's batches in submission order
    pub async fn get_batch_children(
        &self,
        owner_id: &str,
        batch_id: Uuid,
        query: &PageQuery,
    ) -> Result<Page<Job>> {
        let parent = self.get_job(owner_id, batch_id).await?;
        if parent.kind != JobKind::BatchParent {
            return Err(OrchestrationError::InvalidState(format!(
                "job {} is not a batch",
                batch_id
            )));
        }

        let page = page_request(query.page_token.as_deref(), query.limit)?;
        Ok(self
            .store
            .query(&JobFilter::children_of(batch_id), page)
            .await?)
    }

    /// Cancels a job or a whole batch and returns the updated record
    pub async fn cancel(&self, owner_id: &str, job_id: Uuid) -> Result<Job> {
        let job = self.get_job(owner_id, job_id).await?;

        match job.kind {
            JobKind::BatchParent => self.cancel_batch(job).await?,
            JobKind::Individual | JobKind::BatchChild => {
                let parent_id = job.parent_id;
                self.cancel_record(job).await?;

                if let Some(parent_id) = parent_id {
                    if let Err(e) = self
                        .aggregator
                        .on_child_terminal(parent_id, job_id, JobStatus::Cancelled)
                        .await
                    {
                        warn!("Failed to aggregate batch {}: {}", parent_id, e);
                    }
                }
            }
        }

        self.get_job(owner_id, job_id).await
    }

    /// Cancels the parent first so no further child is admitted, then every
    /// child that has not finished
    async fn cancel_batch(&self, parent: Job) -> Result<()> {
        let parent_id = parent.id;
        self.cancel_record(parent).await?;

        let children = load_children(
            self.store.as_ref(),
            parent_id,
            self.config.aggregation_page_size,
        )
        .await?;

        let mut cancelled = 0;
        for child in children.into_iter().filter(|c| !c.status.is_terminal()) {
            let child_id = child.id;
            match self.cancel_record(child).await {
                Ok(()) => cancelled += 1,
                // Finished on its own in the meantime
                Err(OrchestrationError::InvalidState(_)) => {}
                Err(e) => warn!("Failed to cancel child {}: {}", child_id, e),
            }
        }

        info!("Batch {} cancelled ({} children stopped)", parent_id, cancelled);

        if let Err(e) = self.aggregator.refresh(parent_id).await {
            warn!("Failed to refresh batch {}: {}", parent_id, e);
        }

        Ok(())
    }

    /// Moves one record to `Cancelled`, following its status if it moves
    async fn cancel_record(&self, mut job: Job) -> Result<()> {
        for _ in 0..self.config.aggregation_max_retries {
            if job.status.is_terminal() {
                return Err(OrchestrationError::InvalidState(format!(
                    "job {} is already {}",
                    job.id, job.status
                )));
            }

            let cancelled = self
                .store
                .conditional_update(
                    job.id,
                    Precondition::exact(job.status, job.revision),
                    JobPatch::status(JobStatus::Cancelled).completed_at(Utc::now()),
                )
                .await?;

            if cancelled {
                info!("Job {} cancelled (was {})", job.id, job.status);
                return Ok(());
            }

            job = self
                .store
                .get(job.id)
                .await?
                .ok_or(OrchestrationError::NotFound(job.id))?;
        }

        Err(OrchestrationError::Conflict(format!(
            "job {} kept changing while being cancelled",
            job.id
        )))
    }
}

/// Resolves caller pagination parameters
///
/// A missing limit means [`DEFAULT_PAGE_LIMIT`]; larger limits are clamped
/// to [`MAX_PAGE_LIMIT`].
fn page_request(token: Option<&str>, limit: Option<u32>) -> Result<PageRequest> {
    let limit = limit.unwrap_or(DEFAULT_PAGE_LIMIT);
    if limit == 0 {
        return Err(OrchestrationError::Validation(
            "limit must be greater than 0".to_string(),
        ));
    }

    PageRequest::from_token(token, limit.min(MAX_PAGE_LIMIT))
        .ok_or_else(|| OrchestrationError::Validation("invalid page token".to_string()))
}
