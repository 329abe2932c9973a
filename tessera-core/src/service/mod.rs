//! Engine services
//!
//! Business logic shared by the orchestrator and worker binaries. Services
//! hold their collaborators as `Arc<dyn Port>` and never assume anything
//! about the technology behind them.

pub mod aggregator;
pub mod dispatch;
pub mod orchestrator;
pub mod retry;
pub mod submission;

pub use aggregator::BatchAggregator;
pub use dispatch::{DispatchOutcome, Dispatcher, SkipReason};
pub use orchestrator::Orchestrator;
pub use retry::{RetryPolicy, classify_failure};
pub use submission::SubmissionService;

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::Utc;
    use std::sync::Arc;
    use std::time::Duration;
    use uuid::Uuid;

    use super::*;
    use crate::config::EngineConfig;
    use crate::domain::job::{Job, JobStatus};
    use crate::memory::{MemoryObjectStore, MemoryStateStore, MemoryTaskQueue, ScriptedExecutor};
    use crate::ports::store::{JobPatch, StateStore};

    /// In-memory adapters wired the way the binaries wire real ones
    pub struct Harness {
        pub store: Arc<MemoryStateStore>,
        pub queue: Arc<MemoryTaskQueue>,
        pub objects: Arc<MemoryObjectStore>,
        pub config: Arc<EngineConfig>,
    }

    impl Harness {
        pub fn new() -> Self {
            Self::with_config(|_| {})
        }

        pub fn with_config(configure: impl FnOnce(&mut EngineConfig)) -> Self {
            let mut config = EngineConfig::default();
            configure(&mut config);
            Self {
                store: Arc::new(MemoryStateStore::new()),
                queue: Arc::new(MemoryTaskQueue::new()),
                objects: Arc::new(MemoryObjectStore::new()),
                config: Arc::new(config),
            }
        }

        pub fn submission(&self) -> SubmissionService {
            SubmissionService::new(self.store.clone(), self.queue.clone(), self.config.clone())
        }

        pub fn aggregator(&self) -> BatchAggregator {
            BatchAggregator::new(self.store.clone(), self.queue.clone(), self.config.clone())
        }

        pub fn orchestrator(&self) -> Orchestrator {
            Orchestrator::new(self.store.clone(), self.queue.clone(), self.config.clone())
        }

        pub fn dispatcher(&self, executor: Arc<ScriptedExecutor>) -> Dispatcher {
            Dispatcher::new(
                self.store.clone(),
                self.queue.clone(),
                self.objects.clone(),
                executor,
                self.config.clone(),
            )
        }

        pub async fn job(&self, id: Uuid) -> Job {
            self.store.get(id).await.unwrap().unwrap()
        }

        /// Moves a record to `status` regardless of the lifecycle
        pub async fn force_status(&self, id: Uuid, status: JobStatus) {
            let mut job = self.job(id).await;
            JobPatch::status(status).apply(&mut job, Utc::now());
            self.store.overwrite(job);
        }

        /// Records `id` as claimed by a worker that went silent `idle` ago
        pub async fn abandon_running(&self, id: Uuid, idle: Duration) {
            let mut job = self.job(id).await;
            JobPatch::status(JobStatus::Running)
                .with_attempt_count(job.attempt_count + 1)
                .apply(&mut job, Utc::now());
            job.updated_at = Utc::now() - chrono::Duration::from_std(idle).unwrap();
            self.store.overwrite(job);
        }
    }
}
