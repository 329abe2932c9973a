//! Batch Aggregator
//!
//! Keeps a batch parent consistent with its children: admits held children
//! up to the parent's `max_concurrent`, recomputes progress from the current
//! child statuses and settles the parent once every child is terminal.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::batch::{BatchProgress, ChildSummary};
use crate::domain::job::{FailureClass, Job, JobFailure, JobKind, JobOutput, JobStatus};
use crate::error::{OrchestrationError, Result};
use crate::ports::queue::TaskQueue;
use crate::ports::store::{JobFilter, JobPatch, PageRequest, Precondition, StateStore};
use crate::service::submission::release_job;

/// Recomputes batch parents from their children
#[derive(Clone)]
pub struct BatchAggregator {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn TaskQueue>,
    config: Arc<EngineConfig>,
}

impl BatchAggregator {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn TaskQueue>,
        config: Arc<EngineConfig>,
    ) -> Self {
        Self {
            store,
            queue,
            config,
        }
    }

    /// Reacts to one child reaching a terminal status
    pub async fn on_child_terminal(
        &self,
        parent_id: Uuid,
        child_id: Uuid,
        status: JobStatus,
    ) -> Result<()> {
        debug!("Child {} of batch {} is now {}", child_id, parent_id, status);
        self.refresh(parent_id).await
    }

    /// Re-derives admission, progress and status of a batch parent
    ///
    /// Safe to call any number of times and concurrently: every parent write
    /// is conditioned on the status and revision read at the start of the
    /// round, and a lost round starts over from fresh reads.
    pub async fn refresh(&self, parent_id: Uuid) -> Result<()> {
        for round in 1..=self.config.aggregation_max_retries {
            let parent = self
                .store
                .get(parent_id)
                .await?
                .ok_or(OrchestrationError::NotFound(parent_id))?;

            if parent.kind != JobKind::BatchParent {
                return Err(OrchestrationError::InvalidState(format!(
                    "job {} is not a batch parent",
                    parent_id
                )));
            }

            let mut children =
                load_children(self.store.as_ref(), parent_id, self.config.aggregation_page_size)
                    .await?;

            if !parent.status.is_terminal() {
                self.admit(&parent, &mut children).await?;
            }

            let progress = BatchProgress::from_statuses(children.iter().map(|c| c.status));
            let Some(patch) = next_parent_patch(&parent, &children, progress) else {
                return Ok(());
            };
            let settled = patch.status.filter(|s| s.is_terminal());

            let written = self
                .store
                .conditional_update(
                    parent.id,
                    Precondition::exact(parent.status, parent.revision),
                    patch,
                )
                .await?;

            if written {
                if let Some(status) = settled {
                    info!(
                        "Batch {} settled as {} ({} completed, {} failed)",
                        parent.id, status, progress.completed, progress.failed
                    );
                }
                return Ok(());
            }

            debug!(
                "Batch {} changed under aggregation (round {}), recomputing",
                parent_id, round
            );
        }

        warn!(
            "Giving up on batch {} after {} conflicting rounds",
            parent_id, self.config.aggregation_max_retries
        );
        Err(OrchestrationError::Conflict(format!(
            "batch {} kept changing during aggregation",
            parent_id
        )))
    }

    /// Releases held children into the free admission slots
    ///
    /// `children` is updated in place so the progress computed afterwards
    /// reflects the releases.
    async fn admit(&self, parent: &Job, children: &mut [Job]) -> Result<()> {
        let Some(max_concurrent) = parent.max_concurrent else {
            return Ok(());
        };

        let in_flight = children
            .iter()
            .filter(|c| matches!(c.status, JobStatus::Queued | JobStatus::Running))
            .count() as u32;
        let mut slots = max_concurrent.saturating_sub(in_flight);

        for child in children.iter_mut() {
            if slots == 0 {
                break;
            }
            if child.status != JobStatus::Pending {
                continue;
            }

            match release_job(self.store.as_ref(), self.queue.as_ref(), child).await {
                Ok(true) => {
                    child.status = JobStatus::Queued;
                    slots -= 1;
                    debug!("Admitted child {} of batch {}", child.id, parent.id);
                }
                // Another aggregator released it first; its slot is taken
                Ok(false) => slots -= 1,
                Err(OrchestrationError::Queue(e)) => {
                    warn!("Child {} of batch {} failed to dispatch: {}", child.id, parent.id, e);
                    child.status = JobStatus::Failed;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(())
    }
}

/// Reads every child of a batch, in `batch_index` order
pub(crate) async fn load_children(
    store: &dyn StateStore,
    parent_id: Uuid,
    page_size: u32,
) -> Result<Vec<Job>> {
    let filter = JobFilter::children_of(parent_id);
    let mut page = PageRequest::first(page_size);
    let mut children = Vec::new();

    loop {
        let fetched = store.query(&filter, page).await?;
        children.extend(fetched.items);

        if fetched.next_page_token.is_none() {
            return Ok(children);
        }
        page.offset += page.limit as u64;
    }
}

/// Builds the parent update implied by the current children
///
/// Returns `None` when the stored parent already reflects them.
fn next_parent_patch(parent: &Job, children: &[Job], progress: BatchProgress) -> Option<JobPatch> {
    let progress_changed = parent.progress != Some(progress);

    // A cancelled parent keeps its status; only the counters move
    if parent.status.is_terminal() {
        return progress_changed.then(|| JobPatch::default().with_progress(progress));
    }

    if let Some(status) = progress.settled_status() {
        let patch = JobPatch::status(status)
            .with_progress(progress)
            .completed_at(Utc::now());

        return Some(if status == JobStatus::Failed {
            patch.with_error(JobFailure {
                class: FailureClass::Batch,
                code: "all_children_failed".to_string(),
                message: format!(
                    "all {} children failed or were cancelled",
                    progress.total
                ),
                attempt: 0,
            })
        } else {
            patch.with_output(JobOutput {
                children: children
                    .iter()
                    .map(|c| ChildSummary {
                        job_id: c.id,
                        batch_index: c.batch_index.unwrap_or_default(),
                        status: c.status,
                    })
                    .collect(),
                ..JobOutput::default()
            })
        });
    }

    let started = progress.pending < progress.total && parent.status != JobStatus::Running;
    if started {
        return Some(
            JobPatch::status(JobStatus::Running)
                .with_progress(progress)
                .started_at(Utc::now()),
        );
    }

    progress_changed.then(|| JobPatch::default().with_progress(progress))
}
