//! Batch domain types

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::job::JobStatus;

/// Progress counters stored on a batch parent
///
/// Always derived from the current statuses of every child; never
/// incremented in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub total: u32,
    /// Children that are `Pending` or `Queued`
    pub pending: u32,
    pub running: u32,
    pub completed: u32,
    /// Children that are `Failed` or `Cancelled`
    pub failed: u32,
}

impl BatchProgress {
    /// Progress of a freshly submitted batch
    pub fn new(total: u32) -> Self {
        Self {
            total,
            pending: total,
            ..Self::default()
        }
    }

    /// Recomputes progress from child statuses
    pub fn from_statuses(statuses: impl IntoIterator<Item = JobStatus>) -> Self {
        let mut progress = Self::default();
        for status in statuses {
            progress.total += 1;
            match status {
                JobStatus::Pending | JobStatus::Queued => progress.pending += 1,
                JobStatus::Running => progress.running += 1,
                JobStatus::Completed => progress.completed += 1,
                JobStatus::Failed | JobStatus::PartiallyCompleted | JobStatus::Cancelled => {
                    progress.failed += 1
                }
            }
        }
        progress
    }

    /// Every child has reached a terminal status
    pub fn is_settled(&self) -> bool {
        self.completed + self.failed == self.total
    }

    /// Terminal status the parent takes once settled
    ///
    /// A batch with any failed child is never reported as fully `Completed`.
    pub fn settled_status(&self) -> Option<JobStatus> {
        if !self.is_settled() {
            return None;
        }

        Some(if self.failed == 0 {
            JobStatus::Completed
        } else if self.completed == 0 {
            JobStatus::Failed
        } else {
            JobStatus::PartiallyCompleted
        })
    }
}

/// Per-child detail reported on a settled batch parent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSummary {
    pub job_id: Uuid,
    pub batch_index: u32,
    pub status: JobStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_buckets() {
        let progress = BatchProgress::from_statuses([
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Completed,
            JobStatus::Failed,
            JobStatus::Cancelled,
        ]);

        assert_eq!(progress.total, 6);
        assert_eq!(progress.pending, 2);
        assert_eq!(progress.running, 1);
        assert_eq!(progress.completed, 1);
        assert_eq!(progress.failed, 2);
        assert_eq!(
            progress.pending + progress.running + progress.completed + progress.failed,
            progress.total
        );
    }

    #[test]
    fn test_unsettled_batch_has_no_terminal_status() {
        let progress = BatchProgress::from_statuses([JobStatus::Completed, JobStatus::Running]);
        assert!(!progress.is_settled());
        assert_eq!(progress.settled_status(), None);
    }

    #[test]
    fn test_settled_status_policy() {
        let all_ok = BatchProgress::from_statuses([JobStatus::Completed, JobStatus::Completed]);
        assert_eq!(all_ok.settled_status(), Some(JobStatus::Completed));

        let mixed = BatchProgress::from_statuses([JobStatus::Completed, JobStatus::Failed]);
        assert_eq!(mixed.settled_status(), Some(JobStatus::PartiallyCompleted));

        let none_ok = BatchProgress::from_statuses([JobStatus::Failed, JobStatus::Cancelled]);
        assert_eq!(none_ok.settled_status(), Some(JobStatus::Failed));
    }

    #[test]
    fn test_new_progress_is_all_pending() {
        let progress = BatchProgress::new(5);
        assert_eq!(progress.pending, 5);
        assert!(!progress.is_settled());
    }
}
