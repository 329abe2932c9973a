//! Batch-related API endpoints

use tessera_core::domain::job::Job;
use tessera_core::dto::batch::{BatchReceipt, SubmitBatch};
use tessera_core::dto::page::{Page, PageQuery};
use uuid::Uuid;

use crate::TesseraClient;
use crate::error::Result;

impl TesseraClient {
    /// Submit a batch of prediction jobs
    pub async fn submit_batch(&self, req: SubmitBatch) -> Result<BatchReceipt> {
        let response = self.post("/batches").json(&req).send().await?;

        self.handle_response(response).await
    }

    /// One page of a batch's children, in submission order
    pub async fn list_batch_children(&self, batch_id: Uuid, query: &PageQuery) -> Result<Page<Job>> {
        let response = self
            .get(&format!("/batches/{}/children", batch_id))
            .query(query)
            .send()
            .await?;

        self.handle_response(response).await
    }

    /// Every child of a batch, following page tokens until the last page
    pub async fn all_batch_children(&self, batch_id: Uuid) -> Result<Vec<Job>> {
        let mut children = Vec::new();
        let mut query = PageQuery::default();

        loop {
            let page = self.list_batch_children(batch_id, &query).await?;
            children.extend(page.items);

            match page.next_page_token {
                Some(token) => query.page_token = Some(token),
                None => return Ok(children),
            }
        }
    }
}
