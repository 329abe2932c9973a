//! Worker Dispatch Loop
//!
//! Consumes one leased dispatch message: claims the job, invokes the
//! executor, records the outcome and acknowledges the message.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::domain::artifact::ArtifactRef;
use crate::domain::job::{FailureClass, Job, JobFailure, JobKind, JobOutput, JobStatus};
use crate::error::{OrchestrationError, Result};
use crate::ports::executor::{ComputeExecutor, ExecutionRequest, ExecutionResult, ExecutorError};
use crate::ports::objects::{ObjectStore, ObjectStoreError, job_object_key};
use crate::ports::queue::{Lease, LeaseToken, QueueError, TaskQueue};
use crate::ports::store::{JobPatch, Precondition, StateStore};
use crate::service::aggregator::BatchAggregator;
use crate::service::retry::{RetryPolicy, classify_failure};

/// Redelivery delay for a message that arrived before its job left `Pending`
const PENDING_RECHECK_DELAY: Duration = Duration::from_secs(1);

/// Redelivery delay for a message whose batch could not be aggregated
const AGGREGATION_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Object key (under the job prefix) of a result too large to inline
const RESULT_OBJECT: &str = "result.json";

/// What happened to one dispatch message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Completed,
    Failed,
    /// Transient failure; the message comes back after `delay`
    Retrying { attempt: u32, delay: Duration },
    /// The job was cancelled while this worker held it
    Cancelled,
    /// The message was dropped without running anything
    Skipped(SkipReason),
    /// Nothing could be settled yet (the job was not released, or its batch
    /// could not be aggregated); the message comes back shortly
    Deferred,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Missing,
    AlreadyTerminal(JobStatus),
    AlreadyClaimed,
    /// Batch parents are never executed
    NotDispatchable,
}

enum Execution {
    Finished(std::result::Result<ExecutionResult, ExecutorError>),
    /// The record left `Running` under us (`None` if it disappeared)
    Interrupted(Option<JobStatus>),
}

/// Runs leased jobs against the compute executor
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn StateStore>,
    queue: Arc<dyn TaskQueue>,
    objects: Arc<dyn ObjectStore>,
    executor: Arc<dyn ComputeExecutor>,
    aggregator: BatchAggregator,
    retry: RetryPolicy,
    config: Arc<EngineConfig>,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn StateStore>,
        queue: Arc<dyn TaskQueue>,
        objects: Arc<dyn ObjectStore>,
        executor: Arc<dyn ComputeExecutor>,
        config: Arc<EngineConfig>,
    ) -> Self {
        let aggregator = BatchAggregator::new(store.clone(), queue.clone(), config.clone());
        Self {
            store,
            queue,
            objects,
            executor,
            aggregator,
            retry: RetryPolicy::from_config(&config),
            config,
        }
    }

    /// Leases and processes at most one message
    ///
    /// Returns `None` when the queue had nothing visible.
    pub async fn run_once(&self) -> Result<Option<DispatchOutcome>> {
        let Some(lease) = self.queue.lease(self.config.visibility_timeout).await? else {
            return Ok(None);
        };

        debug!(
            "Leased message for job {} (delivery {})",
            lease.message.job_id, lease.delivery_count
        );

        self.process(lease).await.map(Some)
    }

    /// Processes one leased message
    ///
    /// Store errors are returned without touching the lease, so the message
    /// is redelivered once its visibility timeout lapses.
    pub async fn process(&self, lease: Lease) -> Result<DispatchOutcome> {
        let job_id = lease.message.job_id;

        let Some(job) = self.store.get(job_id).await? else {
            warn!("Dispatch message for unknown job {}, dropping it", job_id);
            self.ack(&lease).await;
            return Ok(DispatchOutcome::Skipped(SkipReason::Missing));
        };

        match job.status {
            status if status.is_terminal() => {
                // The worker that finished it may have died before its batch
                // saw the result
                if !self.aggregate(&job, status).await {
                    self.nack(&lease, AGGREGATION_RETRY_DELAY).await;
                    return Ok(DispatchOutcome::Deferred);
                }
                debug!("Job {} is already {}, dropping message", job_id, status);
                self.ack(&lease).await;
                return Ok(DispatchOutcome::Skipped(SkipReason::AlreadyTerminal(status)));
            }
            JobStatus::Running if lease.delivery_count > 1 && self.worker_lost(&job) => {
                return self.reclaim(job, lease).await;
            }
            JobStatus::Running => {
                debug!("Job {} is already running elsewhere, dropping message", job_id);
                self.ack(&lease).await;
                return Ok(DispatchOutcome::Skipped(SkipReason::AlreadyClaimed));
            }
            JobStatus::Pending => {
                debug!("Job {} is not released yet, deferring", job_id);
                self.nack(&lease, PENDING_RECHECK_DELAY).await;
                return Ok(DispatchOutcome::Deferred);
            }
            _ => {}
        }

        if job.kind == JobKind::BatchParent {
            warn!("Dispatch message for batch parent {}, dropping it", job_id);
            self.ack(&lease).await;
            return Ok(DispatchOutcome::Skipped(SkipReason::NotDispatchable));
        }

        self.run(job, lease).await
    }

    /// Claims a `Queued` job and runs one attempt of it
    async fn run(&self, job: Job, lease: Lease) -> Result<DispatchOutcome> {
        let job_id = job.id;
        let attempt = job.attempt_count + 1;
        let mut claim = JobPatch::status(JobStatus::Running).with_attempt_count(attempt);
        if job.started_at.is_none() {
            claim = claim.started_at(Utc::now());
        }

        let claimed = self
            .store
            .conditional_update(
                job.id,
                Precondition::exact(JobStatus::Queued, job.revision),
                claim,
            )
            .await?;

        if !claimed {
            debug!("Lost claim on job {}, dropping message", job_id);
            self.ack(&lease).await;
            return Ok(DispatchOutcome::Skipped(SkipReason::AlreadyClaimed));
        }

        info!(
            "Running job {} (attempt {}/{})",
            job_id, attempt, self.retry.max_attempts
        );

        if let Some(parent_id) = job.parent_id {
            if let Err(e) = self.mark_parent_running(parent_id).await {
                warn!("Failed to mark batch {} running: {}", parent_id, e);
            }
        }

        let request = ExecutionRequest {
            job_id,
            input: job.input.clone(),
            attempt,
        };

        match self.execute(lease.token, &request).await {
            Execution::Finished(Ok(result)) => self.complete(&job, attempt, result, &lease).await,
            Execution::Finished(Err(err)) => {
                let failure = JobFailure {
                    class: classify_failure(&err),
                    code: err.code().to_string(),
                    message: err.to_string(),
                    attempt,
                };
                self.fail_or_retry(&job, failure, &lease).await
            }
            Execution::Interrupted(status) => {
                info!(
                    "Job {} left Running during execution ({:?}), discarding result",
                    job_id, status
                );
                self.ack(&lease).await;
                Ok(DispatchOutcome::Cancelled)
            }
        }
    }

    /// Whether a `Running` job has gone a whole visibility timeout without a
    /// heartbeat from its worker
    fn worker_lost(&self, job: &Job) -> bool {
        (Utc::now() - job.updated_at)
            .to_std()
            .is_ok_and(|idle| idle > self.config.visibility_timeout)
    }

    /// Takes over a job whose worker stopped heartbeating
    ///
    /// The interrupted attempt counts: the job runs again here if it has
    /// attempts left and is failed otherwise. Both writes are conditioned on
    /// the revision read, so a worker that heartbeats in between keeps it.
    async fn reclaim(&self, job: Job, lease: Lease) -> Result<DispatchOutcome> {
        let attempt = job.attempt_count;
        warn!(
            "Job {} has no heartbeat since {}, reclaiming attempt {}",
            job.id, job.updated_at, attempt
        );

        let expected = Precondition::exact(JobStatus::Running, job.revision);
        let failure = JobFailure {
            class: FailureClass::Transient,
            code: "worker_lost".to_string(),
            message: format!("worker stopped heartbeating at {}", job.updated_at),
            attempt,
        };

        if self.retry.should_retry(failure.class, attempt) {
            let requeued = self
                .store
                .conditional_update(job.id, expected, JobPatch::status(JobStatus::Queued))
                .await?;

            if !requeued {
                debug!("Job {} was taken back by someone else, dropping message", job.id);
                self.ack(&lease).await;
                return Ok(DispatchOutcome::Skipped(SkipReason::AlreadyClaimed));
            }

            let Some(job) = self.store.get(job.id).await? else {
                self.ack(&lease).await;
                return Ok(DispatchOutcome::Skipped(SkipReason::Missing));
            };
            return self.run(job, lease).await;
        }

        let patch = JobPatch::status(JobStatus::Failed)
            .with_error(failure)
            .completed_at(Utc::now());

        if !self.store.conditional_update(job.id, expected, patch).await? {
            debug!("Job {} was taken back by someone else, dropping message", job.id);
            self.ack(&lease).await;
            return Ok(DispatchOutcome::Skipped(SkipReason::AlreadyClaimed));
        }

        Ok(self.settle(&job, JobStatus::Failed, &lease).await)
    }

    async fn mark_parent_running(&self, parent_id: Uuid) -> Result<()> {
        let Some(parent) = self.store.get(parent_id).await? else {
            warn!("Batch parent {} not found", parent_id);
            return Ok(());
        };

        if matches!(parent.status, JobStatus::Pending | JobStatus::Queued) {
            // Losing this race is fine, someone else already moved it
            self.store
                .conditional_update(
                    parent.id,
                    Precondition::exact(parent.status, parent.revision),
                    JobPatch::status(JobStatus::Running).started_at(Utc::now()),
                )
                .await?;
        }

        Ok(())
    }

    /// Invokes the executor under the execution timeout
    ///
    /// Races the invocation against a watch on the job record so a
    /// cancellation stops waiting on the executor. The lease is renewed and
    /// the job heartbeats for as long as the invocation runs.
    async fn execute(&self, token: LeaseToken, request: &ExecutionRequest) -> Execution {
        let renewal = self.spawn_heartbeat(token, request.job_id);

        let execution = tokio::select! {
            result = tokio::time::timeout(
                self.config.execution_timeout,
                self.executor.invoke(request),
            ) => Execution::Finished(result.unwrap_or(Err(ExecutorError::Timeout))),
            status = self.watch_for_interruption(request.job_id) => Execution::Interrupted(status),
        };

        renewal.abort();
        execution
    }

    /// Every half visibility timeout, extends the lease and touches the job
    ///
    /// The job keeps heartbeating after the lease is lost, so a redelivered
    /// copy of the message does not mistake this worker for a dead one.
    fn spawn_heartbeat(&self, token: LeaseToken, job_id: Uuid) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let store = self.store.clone();
        let visibility = self.config.visibility_timeout;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(visibility / 2);
            // First tick completes immediately
            ticker.tick().await;
            let mut leased = true;

            loop {
                ticker.tick().await;

                if leased {
                    match queue.extend_lease(token, visibility).await {
                        Ok(()) => debug!("Extended lease {}", token),
                        Err(QueueError::LeaseLost(_)) => {
                            warn!("Lease {} was lost during execution", token);
                            leased = false;
                        }
                        Err(e) => warn!("Failed to extend lease {}: {}", token, e),
                    }
                }

                match store
                    .conditional_update(
                        job_id,
                        Precondition::status(JobStatus::Running),
                        JobPatch::heartbeat(),
                    )
                    .await
                {
                    Ok(true) => {}
                    // No longer running; the interruption watch takes it from here
                    Ok(false) => break,
                    Err(e) => warn!("Failed to record heartbeat of job {}: {}", job_id, e),
                }
            }
        })
    }

    /// Resolves once the job is no longer `Running`
    async fn watch_for_interruption(&self, job_id: Uuid) -> Option<JobStatus> {
        loop {
            tokio::time::sleep(self.config.cancel_poll_interval).await;

            match self.store.get(job_id).await {
                Ok(Some(job)) if job.status == JobStatus::Running => {}
                Ok(Some(job)) => return Some(job.status),
                Ok(None) => return None,
                Err(e) => warn!("Failed to check job {} for cancellation: {}", job_id, e),
            }
        }
    }

    async fn complete(
        &self,
        job: &Job,
        attempt: u32,
        result: ExecutionResult,
        lease: &Lease,
    ) -> Result<DispatchOutcome> {
        let output = match self.persist_output(job.id, result).await {
            Ok(output) => output,
            Err(e) => {
                error!("Failed to store output of job {}: {}", job.id, e);
                // A bad path comes back the same on every attempt
                let (class, code) = match &e {
                    ObjectStoreError::InvalidKey(_) => {
                        (FailureClass::Permanent, "invalid_artifact_path")
                    }
                    _ => (FailureClass::Transient, "artifact_store"),
                };
                let failure = JobFailure {
                    class,
                    code: code.to_string(),
                    message: e.to_string(),
                    attempt,
                };
                return self.fail_or_retry(job, failure, lease).await;
            }
        };

        let patch = JobPatch::status(JobStatus::Completed)
            .with_output(output)
            .completed_at(Utc::now());

        self.finish(job, JobStatus::Completed, patch, lease).await
    }

    /// Writes artifacts and, when it is too large to inline, the result
    async fn persist_output(
        &self,
        job_id: Uuid,
        result: ExecutionResult,
    ) -> std::result::Result<JobOutput, ObjectStoreError> {
        let mut artifacts = Vec::with_capacity(result.artifacts.len());
        for artifact in result.artifacts {
            let key = job_object_key(job_id, &artifact.path)?;
            let object = self.objects.put(&key, artifact.content).await?;
            artifacts.push(ArtifactRef {
                path: artifact.path,
                object,
            });
        }

        let encoded =
            serde_json::to_vec(&result.output).map_err(|e| ObjectStoreError::Backend(e.into()))?;

        let (inline, result_ref) = if encoded.len() > self.config.inline_output_limit {
            let key = job_object_key(job_id, RESULT_OBJECT)?;
            debug!(
                "Result of job {} is {} bytes, storing as {}",
                job_id,
                encoded.len(),
                key
            );
            (None, Some(self.objects.put(&key, encoded).await?))
        } else {
            (Some(result.output), None)
        };

        Ok(JobOutput {
            result: inline,
            result_ref,
            artifacts,
            children: Vec::new(),
        })
    }

    async fn fail_or_retry(
        &self,
        job: &Job,
        failure: JobFailure,
        lease: &Lease,
    ) -> Result<DispatchOutcome> {
        let attempt = failure.attempt;

        if self.retry.should_retry(failure.class, attempt) {
            let requeued = self
                .store
                .conditional_update(
                    job.id,
                    Precondition::status(JobStatus::Running),
                    JobPatch::status(JobStatus::Queued),
                )
                .await?;

            if !requeued {
                return self.resolve_lost_write(job.id, lease).await;
            }

            let delay = self.retry.backoff(attempt);
            warn!(
                "Job {} failed on attempt {}/{} ({}), retrying in {:?}",
                job.id, attempt, self.retry.max_attempts, failure.message, delay
            );
            self.nack(lease, delay).await;

            return Ok(DispatchOutcome::Retrying { attempt, delay });
        }

        let patch = JobPatch::status(JobStatus::Failed)
            .with_error(failure)
            .completed_at(Utc::now());

        self.finish(job, JobStatus::Failed, patch, lease).await
    }

    /// Writes a terminal status, then settles the message
    async fn finish(
        &self,
        job: &Job,
        status: JobStatus,
        patch: JobPatch,
        lease: &Lease,
    ) -> Result<DispatchOutcome> {
        let written = self
            .store
            .conditional_update(job.id, Precondition::status(JobStatus::Running), patch)
            .await?;

        if !written {
            return self.resolve_lost_write(job.id, lease).await;
        }

        Ok(self.settle(job, status, lease).await)
    }

    /// Notifies the batch of a job that just became terminal and acks
    ///
    /// If the batch could not be aggregated the message is released instead,
    /// and its redelivery retries the aggregation.
    async fn settle(&self, job: &Job, status: JobStatus, lease: &Lease) -> DispatchOutcome {
        match status {
            JobStatus::Completed => info!("Job {} completed", job.id),
            _ => warn!("Job {} finished as {}", job.id, status),
        }

        if self.aggregate(job, status).await {
            self.ack(lease).await;
        } else {
            self.nack(lease, AGGREGATION_RETRY_DELAY).await;
        }

        if status == JobStatus::Completed {
            DispatchOutcome::Completed
        } else {
            DispatchOutcome::Failed
        }
    }

    /// Brings the batch of a terminal child up to date
    ///
    /// Returns `false` when the aggregation has to be retried.
    async fn aggregate(&self, job: &Job, status: JobStatus) -> bool {
        let Some(parent_id) = job.parent_id else {
            return true;
        };

        match self
            .aggregator
            .on_child_terminal(parent_id, job.id, status)
            .await
        {
            Ok(()) => true,
            Err(OrchestrationError::NotFound(_)) => {
                warn!("Batch {} of job {} no longer exists", parent_id, job.id);
                true
            }
            Err(e) => {
                warn!("Failed to aggregate batch {}: {}", parent_id, e);
                false
            }
        }
    }

    /// A write conditioned on `Running` lost; whatever is recorded now wins
    async fn resolve_lost_write(&self, job_id: Uuid, lease: &Lease) -> Result<DispatchOutcome> {
        let current = self.store.get(job_id).await?.map(|j| j.status);
        self.ack(lease).await;

        match current {
            Some(JobStatus::Cancelled) => {
                info!("Job {} was cancelled while running, result discarded", job_id);
                Ok(DispatchOutcome::Cancelled)
            }
            other => {
                warn!("Job {} moved to {:?} under this worker", job_id, other);
                Ok(DispatchOutcome::Skipped(SkipReason::AlreadyClaimed))
            }
        }
    }

    async fn ack(&self, lease: &Lease) {
        if let Err(e) = self.queue.ack(lease.token).await {
            warn!("Failed to ack message for job {}: {}", lease.message.job_id, e);
        }
    }

    async fn nack(&self, lease: &Lease, delay: Duration) {
        if let Err(e) = self.queue.nack(lease.token, Some(delay)).await {
            warn!("Failed to release message for job {}: {}", lease.message.job_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dto::batch::SubmitBatch;
    use crate::dto::page::Page;
    use crate::memory::{MemoryStateStore, ScriptedExecutor};
    use crate::ports::executor::Artifact;
    use crate::ports::queue::DispatchMessage;
    use crate::ports::store::{JobFilter, PageRequest, StoreError};
    use crate::service::test_support::Harness;
    use async_trait::async_trait;
    use serde_json::json;

    /// Yields after every read, so concurrent consumers act on the same
    /// snapshot before either of them writes
    struct InterleavingStore(Arc<MemoryStateStore>);

    #[async_trait]
    impl StateStore for InterleavingStore {
        async fn create(&self, job: &Job) -> std::result::Result<(), StoreError> {
            self.0.create(job).await
        }

        async fn create_many(&self, jobs: &[Job]) -> std::result::Result<(), StoreError> {
            self.0.create_many(jobs).await
        }

        async fn get(&self, id: Uuid) -> std::result::Result<Option<Job>, StoreError> {
            let job = self.0.get(id).await;
            tokio::task::yield_now().await;
            job
        }

        async fn conditional_update(
            &self,
            id: Uuid,
            expected: Precondition,
            patch: JobPatch,
        ) -> std::result::Result<bool, StoreError> {
            self.0.conditional_update(id, expected, patch).await
        }

        async fn query(
            &self,
            filter: &JobFilter,
            page: PageRequest,
        ) -> std::result::Result<Page<Job>, StoreError> {
            self.0.query(filter, page).await
        }

        async fn count_active(&self, owner_id: &str) -> std::result::Result<u64, StoreError> {
            self.0.count_active(owner_id).await
        }
    }

    async fn submit_batch(h: &Harness, items: usize, max_concurrent: u32) -> (Uuid, Vec<Uuid>) {
        let receipt = h
            .submission()
            .submit_batch(
                "alice",
                SubmitBatch {
                    shared_params: json!({}),
                    items: (0..items).map(|i| json!({"i": i})).collect(),
                    max_concurrent: Some(max_concurrent),
                },
            )
            .await
            .unwrap();
        (receipt.batch_id, receipt.child_ids)
    }

    async fn submit(h: &Harness) -> Uuid {
        h.submission()
            .submit_individual("alice", json!({"sequence": "MKT"}))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_success_completes_job() {
        let h = Harness::new();
        let job_id = submit(&h).await;
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({"plddt": 91.5})));

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Completed));
        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt_count, 1);
        assert_eq!(job.output.unwrap().result, Some(json!({"plddt": 91.5})));
        assert!(job.started_at.is_some());
        assert!(job.completed_at.is_some());
        assert!(h.queue.is_empty());

        let requests = executor.requests();
        assert_eq!(requests[0].attempt, 1);
        assert_eq!(requests[0].input, json!({"sequence": "MKT"}));
    }

    #[tokio::test]
    async fn test_empty_queue() {
        let h = Harness::new();
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));
        assert_eq!(h.dispatcher(executor).run_once().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_artifacts_and_large_results_go_to_object_store() {
        let h = Harness::with_config(|c| c.inline_output_limit = 16);
        let job_id = submit(&h).await;
        let executor = Arc::new(ScriptedExecutor::with_fallback(Ok(ExecutionResult {
            output: json!({"summary": "a result that does not fit inline"}),
            artifacts: vec![Artifact {
                path: "models/model_0.cif".to_string(),
                content: b"data_model".to_vec(),
            }],
        })));

        h.dispatcher(executor).run_once().await.unwrap();

        let output = h.job(job_id).await.output.unwrap();
        assert!(output.result.is_none());
        let result_ref = output.result_ref.unwrap();
        assert_eq!(result_ref.key, format!("jobs/{}/result.json", job_id));
        let stored = h.objects.get(&result_ref).await.unwrap();
        let decoded: serde_json::Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(decoded["summary"], "a result that does not fit inline");

        assert_eq!(output.artifacts.len(), 1);
        assert_eq!(output.artifacts[0].path, "models/model_0.cif");
        assert_eq!(
            h.objects.get(&output.artifacts[0].object).await.unwrap(),
            b"data_model".to_vec()
        );
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let h = Harness::new();
        let job_id = submit(&h).await;
        let executor = Arc::new(ScriptedExecutor::failing(ExecutorError::InvalidInput(
            "unknown residue".into(),
        )));

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Failed));
        assert_eq!(executor.invocations(), 1);
        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 1);
        let error = job.error.unwrap();
        assert_eq!(error.class, FailureClass::Permanent);
        assert_eq!(error.code, "invalid_input");
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failures_exhaust_attempts() {
        let h = Harness::with_config(|c| c.max_attempts = 3);
        let job_id = submit(&h).await;
        let executor = Arc::new(ScriptedExecutor::failing(ExecutorError::Unavailable(
            "503".into(),
        )));
        let dispatcher = h.dispatcher(executor.clone());

        let first = dispatcher.run_once().await.unwrap();
        assert_eq!(
            first,
            Some(DispatchOutcome::Retrying {
                attempt: 1,
                delay: Duration::from_secs(2)
            })
        );
        assert_eq!(h.job(job_id).await.status, JobStatus::Queued);

        // The message stays hidden until the backoff elapses
        assert_eq!(dispatcher.run_once().await.unwrap(), None);
        tokio::time::advance(Duration::from_secs(2)).await;

        let second = dispatcher.run_once().await.unwrap();
        assert!(matches!(
            second,
            Some(DispatchOutcome::Retrying { attempt: 2, .. })
        ));
        tokio::time::advance(Duration::from_secs(4)).await;

        let third = dispatcher.run_once().await.unwrap();
        assert_eq!(third, Some(DispatchOutcome::Failed));
        assert_eq!(executor.invocations(), 3);

        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 3);
        let error = job.error.unwrap();
        assert_eq!(error.class, FailureClass::Transient);
        assert_eq!(error.attempt, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let h = Harness::new();
        let job_id = submit(&h).await;
        let executor = Arc::new(
            ScriptedExecutor::succeeding(json!({"ok": true})).then(Err(ExecutorError::RateLimited)),
        );
        let dispatcher = h.dispatcher(executor.clone());

        dispatcher.run_once().await.unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;
        let outcome = dispatcher.run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Completed));
        let job = h.job(job_id).await;
        assert_eq!(job.attempt_count, 2);
        assert_eq!(executor.requests()[1].attempt, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_execution_timeout_is_transient() {
        let h = Harness::with_config(|c| {
            c.execution_timeout = Duration::from_secs(30);
            c.cancel_poll_interval = Duration::from_secs(60);
        });
        submit(&h).await;
        let executor = Arc::new(
            ScriptedExecutor::succeeding(json!({})).with_delay(Duration::from_secs(600)),
        );

        let outcome = h.dispatcher(executor).run_once().await.unwrap();

        assert!(matches!(
            outcome,
            Some(DispatchOutcome::Retrying { attempt: 1, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_execution_keeps_lease() {
        let h = Harness::with_config(|c| c.visibility_timeout = Duration::from_secs(10));
        let job_id = submit(&h).await;
        let executor = Arc::new(
            ScriptedExecutor::succeeding(json!({})).with_delay(Duration::from_secs(45)),
        );

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Completed));
        assert_eq!(executor.invocations(), 1);
        assert_eq!(h.job(job_id).await.status, JobStatus::Completed);
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_during_execution_wins() {
        let h = Harness::new();
        let job_id = submit(&h).await;
        let executor = Arc::new(
            ScriptedExecutor::succeeding(json!({"late": true})).with_delay(Duration::from_secs(600)),
        );
        let dispatcher = h.dispatcher(executor);

        let handle = tokio::spawn(async move { dispatcher.run_once().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        h.force_status(job_id, JobStatus::Cancelled).await;

        let outcome = handle.await.unwrap().unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Cancelled));
        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.output.is_none());
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_delivery_runs_once() {
        let h = Harness::new();
        let job_id = submit(&h).await;
        h.queue
            .enqueue(DispatchMessage { job_id }, None)
            .await
            .unwrap();
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));
        let dispatcher = h.dispatcher(executor.clone());

        let first = dispatcher.run_once().await.unwrap();
        let second = dispatcher.run_once().await.unwrap();

        assert_eq!(first, Some(DispatchOutcome::Completed));
        assert_eq!(
            second,
            Some(DispatchOutcome::Skipped(SkipReason::AlreadyTerminal(
                JobStatus::Completed
            )))
        );
        assert_eq!(executor.invocations(), 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_duplicate_delivery_claims_once() {
        let h = Harness::new();
        let job_id = submit(&h).await;
        h.queue
            .enqueue(DispatchMessage { job_id }, None)
            .await
            .unwrap();
        let executor = Arc::new(
            ScriptedExecutor::succeeding(json!({})).with_delay(Duration::from_secs(1)),
        );
        let dispatcher = Dispatcher::new(
            Arc::new(InterleavingStore(h.store.clone())),
            h.queue.clone(),
            h.objects.clone(),
            executor.clone(),
            h.config.clone(),
        );

        let first = h.queue.lease(h.config.visibility_timeout).await.unwrap().unwrap();
        let second = h.queue.lease(h.config.visibility_timeout).await.unwrap().unwrap();
        let (a, b) = tokio::join!(dispatcher.process(first), dispatcher.process(second));
        let outcomes = [a.unwrap(), b.unwrap()];

        assert!(outcomes.contains(&DispatchOutcome::Completed));
        assert!(outcomes.contains(&DispatchOutcome::Skipped(SkipReason::AlreadyClaimed)));
        assert_eq!(executor.invocations(), 1);
        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt_count, 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_job_of_crashed_worker_is_rerun() {
        let h = Harness::with_config(|c| c.visibility_timeout = Duration::from_secs(10));
        let job_id = submit(&h).await;
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({"ok": true})));
        let dispatcher = h.dispatcher(executor.clone());

        // A worker leases and claims the job, then dies without a trace
        let crashed = h.queue.lease(h.config.visibility_timeout).await.unwrap();
        assert!(crashed.is_some());
        h.abandon_running(job_id, Duration::from_secs(60)).await;

        assert_eq!(dispatcher.run_once().await.unwrap(), None);
        tokio::time::advance(Duration::from_secs(11)).await;

        let outcome = dispatcher.run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Completed));
        assert_eq!(executor.invocations(), 1);
        assert_eq!(executor.requests()[0].attempt, 2);
        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.attempt_count, 2);
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_crashed_worker_on_last_attempt_fails_job() {
        let h = Harness::with_config(|c| {
            c.visibility_timeout = Duration::from_secs(10);
            c.max_attempts = 1;
        });
        let job_id = submit(&h).await;
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));

        h.queue.lease(h.config.visibility_timeout).await.unwrap();
        h.abandon_running(job_id, Duration::from_secs(60)).await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Failed));
        assert_eq!(executor.invocations(), 0);
        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        let error = job.error.unwrap();
        assert_eq!(error.class, FailureClass::Transient);
        assert_eq!(error.code, "worker_lost");
        assert_eq!(error.attempt, 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_redelivery_leaves_heartbeating_job_alone() {
        let h = Harness::with_config(|c| c.visibility_timeout = Duration::from_secs(10));
        let job_id = submit(&h).await;
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));

        h.queue.lease(h.config.visibility_timeout).await.unwrap();
        h.abandon_running(job_id, Duration::ZERO).await;
        tokio::time::advance(Duration::from_secs(11)).await;

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Skipped(SkipReason::AlreadyClaimed)));
        assert_eq!(executor.invocations(), 0);
        assert_eq!(h.job(job_id).await.status, JobStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_running_job_heartbeats() {
        let h = Harness::with_config(|c| {
            c.visibility_timeout = Duration::from_secs(10);
            c.cancel_poll_interval = Duration::from_secs(60);
        });
        let job_id = submit(&h).await;
        let executor = Arc::new(
            ScriptedExecutor::succeeding(json!({})).with_delay(Duration::from_secs(12)),
        );
        let dispatcher = h.dispatcher(executor);

        let handle = tokio::spawn(async move { dispatcher.run_once().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        let claimed = h.job(job_id).await;
        tokio::time::sleep(Duration::from_secs(10)).await;
        let running = h.job(job_id).await;

        assert_eq!(running.status, JobStatus::Running);
        assert_eq!(running.revision, claimed.revision + 2);
        assert!(running.updated_at >= claimed.updated_at);

        let outcome = handle.await.unwrap().unwrap();
        assert_eq!(outcome, Some(DispatchOutcome::Completed));
    }

    #[tokio::test]
    async fn test_invalid_artifact_path_is_permanent() {
        let h = Harness::new();
        let job_id = submit(&h).await;
        let executor = Arc::new(ScriptedExecutor::with_fallback(Ok(ExecutionResult {
            output: json!({}),
            artifacts: vec![Artifact {
                path: "../escape".to_string(),
                content: b"x".to_vec(),
            }],
        })));

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Failed));
        assert_eq!(executor.invocations(), 1);
        let job = h.job(job_id).await;
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.attempt_count, 1);
        let error = job.error.unwrap();
        assert_eq!(error.class, FailureClass::Permanent);
        assert_eq!(error.code, "invalid_artifact_path");
        assert!(h.objects.keys().is_empty());
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_message_for_unknown_job_is_dropped() {
        let h = Harness::new();
        h.queue
            .enqueue(
                DispatchMessage {
                    job_id: Uuid::new_v4(),
                },
                None,
            )
            .await
            .unwrap();
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Skipped(SkipReason::Missing)));
        assert_eq!(executor.invocations(), 0);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_job_is_never_run() {
        let h = Harness::new();
        let job_id = submit(&h).await;
        h.force_status(job_id, JobStatus::Cancelled).await;
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(
            outcome,
            Some(DispatchOutcome::Skipped(SkipReason::AlreadyTerminal(
                JobStatus::Cancelled
            )))
        );
        assert_eq!(executor.invocations(), 0);
    }

    #[tokio::test]
    async fn test_pending_job_is_deferred() {
        let h = Harness::new();
        let job = Job::individual("alice", json!({}));
        h.store.create(&job).await.unwrap();
        h.queue
            .enqueue(DispatchMessage { job_id: job.id }, None)
            .await
            .unwrap();
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(outcome, Some(DispatchOutcome::Deferred));
        assert_eq!(executor.invocations(), 0);
        assert_eq!(h.queue.len(), 1);
    }

    #[tokio::test]
    async fn test_child_completion_settles_batch() {
        let h = Harness::new();
        let receipt = h
            .submission()
            .submit_batch(
                "alice",
                SubmitBatch {
                    shared_params: json!({"model": "v1"}),
                    items: vec![json!({"seq": "A"}), json!({"seq": "B"})],
                    max_concurrent: Some(1),
                },
            )
            .await
            .unwrap();
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({"ok": true})));
        let dispatcher = h.dispatcher(executor.clone());

        assert_eq!(
            dispatcher.run_once().await.unwrap(),
            Some(DispatchOutcome::Completed)
        );
        let parent = h.job(receipt.batch_id).await;
        assert_eq!(parent.status, JobStatus::Running);
        assert_eq!(parent.progress.unwrap().completed, 1);
        assert_eq!(h.job(receipt.child_ids[1]).await.status, JobStatus::Queued);

        assert_eq!(
            dispatcher.run_once().await.unwrap(),
            Some(DispatchOutcome::Completed)
        );
        let parent = h.job(receipt.batch_id).await;
        assert_eq!(parent.status, JobStatus::Completed);
        assert_eq!(parent.progress.unwrap().completed, 2);
        assert_eq!(executor.invocations(), 2);
        assert_eq!(executor.requests()[1].input, json!({"model": "v1", "seq": "B"}));
    }

    #[tokio::test]
    async fn test_redelivered_terminal_child_settles_batch() {
        let h = Harness::new();
        let (batch_id, children) = submit_batch(&h, 2, 2).await;
        for id in &children {
            h.force_status(*id, JobStatus::Completed).await;
        }
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));

        let outcome = h.dispatcher(executor.clone()).run_once().await.unwrap();

        assert_eq!(
            outcome,
            Some(DispatchOutcome::Skipped(SkipReason::AlreadyTerminal(
                JobStatus::Completed
            )))
        );
        assert_eq!(executor.invocations(), 0);
        let parent = h.job(batch_id).await;
        assert_eq!(parent.status, JobStatus::Completed);
        assert_eq!(parent.progress.unwrap().completed, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_aggregation_brings_message_back() {
        let h = Harness::with_config(|c| c.aggregation_max_retries = 0);
        let (batch_id, children) = submit_batch(&h, 1, 1).await;
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({})));
        let stuck = h.dispatcher(executor.clone());

        assert_eq!(stuck.run_once().await.unwrap(), Some(DispatchOutcome::Completed));
        assert_eq!(h.job(children[0]).await.status, JobStatus::Completed);
        assert!(!h.job(batch_id).await.status.is_terminal());
        assert_eq!(h.queue.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(stuck.run_once().await.unwrap(), Some(DispatchOutcome::Deferred));
        assert_eq!(h.queue.len(), 1);

        tokio::time::advance(Duration::from_secs(1)).await;
        let healthy = Dispatcher::new(
            h.store.clone(),
            h.queue.clone(),
            h.objects.clone(),
            executor.clone(),
            Arc::new(EngineConfig::default()),
        );
        assert_eq!(
            healthy.run_once().await.unwrap(),
            Some(DispatchOutcome::Skipped(SkipReason::AlreadyTerminal(
                JobStatus::Completed
            )))
        );

        assert_eq!(h.job(batch_id).await.status, JobStatus::Completed);
        assert_eq!(executor.invocations(), 1);
        assert!(h.queue.is_empty());
    }

    #[tokio::test]
    async fn test_batch_of_three_runs_one_child_at_a_time() {
        let h = Harness::new();
        let (batch_id, children) = submit_batch(&h, 3, 1).await;
        let executor = Arc::new(ScriptedExecutor::succeeding(json!({"ok": true})));
        let dispatcher = h.dispatcher(executor.clone());

        for (step, child_id) in children.iter().enumerate() {
            assert_eq!(h.queue.messages(), vec![DispatchMessage { job_id: *child_id }]);
            for later in &children[step + 1..] {
                assert_eq!(h.job(*later).await.status, JobStatus::Pending);
            }

            assert_eq!(
                dispatcher.run_once().await.unwrap(),
                Some(DispatchOutcome::Completed)
            );
            assert_eq!(h.job(*child_id).await.status, JobStatus::Completed);
        }

        assert_eq!(dispatcher.run_once().await.unwrap(), None);
        let parent = h.job(batch_id).await;
        assert_eq!(parent.status, JobStatus::Completed);
        assert_eq!(parent.progress.unwrap().completed, 3);
        assert_eq!(executor.invocations(), 3);
    }
}
