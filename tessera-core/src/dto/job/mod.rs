//! Job DTOs

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::domain::job::{JobKind, JobStatus};

/// Request to submit one prediction job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitJob {
    pub input: JsonValue,
}

/// Acknowledgement of an accepted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReceipt {
    pub job_id: Uuid,
}

/// Filters for listing the caller's jobs
///
/// Without `kind`, only top-level jobs (individual jobs and batch parents)
/// are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListJobs {
    pub status: Option<JobStatus>,
    pub kind: Option<JobKind>,
    pub page_token: Option<String>,
    pub limit: Option<u32>,
}
