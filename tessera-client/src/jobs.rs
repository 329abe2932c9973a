//! Job-related API endpoints

use tessera_core::domain::job::Job;
use tessera_core::dto::job::{JobReceipt, ListJobs, SubmitJob};
use tessera_core::dto::page::Page;
use uuid::Uuid;

use crate::TesseraClient;
use crate::error::Result;

impl TesseraClient {
    /// Submit one prediction job
    ///
    /// The job is accepted asynchronously; poll [`TesseraClient::get_job`]
    /// for its outcome.
    pub async fn submit_job(&self, req: SubmitJob) -> Result<JobReceipt> {
        let response = self.post("/jobs").json(&req).send().await?;

        self.handle_response(response).await
    }

    /// Get a job by ID
    pub async fn get_job(&self, job_id: Uuid) -> Result<Job> {
        let response = self.get(&format!("/jobs/{}", job_id)).send().await?;

        self.handle_response(response).await
    }

    /// List the caller's jobs, newest first
    pub async fn list_jobs(&self, query: &ListJobs) -> Result<Page<Job>> {
        let response = self.get("/jobs").query(query).send().await?;

        self.handle_response(response).await
    }

    /// Cancel a job, or a whole batch when given a batch id
    pub async fn cancel_job(&self, job_id: Uuid) -> Result<Job> {
        let response = self
            .post(&format!("/jobs/{}/cancel", job_id))
            .send()
            .await?;

        self.handle_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::domain::job::JobStatus;

    #[test]
    fn test_list_query_skips_unset_filters() {
        let client = TesseraClient::new("http://localhost:8080", "alice");
        let query = ListJobs {
            status: Some(JobStatus::Running),
            limit: Some(20),
            ..ListJobs::default()
        };

        let request = client.get("/jobs").query(&query).build().unwrap();
        assert_eq!(request.url().query(), Some("status=Running&limit=20"));
    }
}
