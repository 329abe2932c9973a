//! ID resolver module
//!
//! Resolves job id prefixes to full ids by paging through the caller's jobs.

use anyhow::{Context, Result, anyhow};
use tessera_client::TesseraClient;
use tessera_core::dto::job::ListJobs;
use uuid::Uuid;

use crate::types::IdOrPrefix;

/// Resolve a job ID or prefix to a full UUID
///
/// Prefixes are matched against the caller's top-level jobs (individual jobs
/// and batches).
///
/// # Errors
/// Returns an error if no job or more than one job matches the prefix
pub async fn resolve_job_id(client: &TesseraClient, id_or_prefix: &IdOrPrefix) -> Result<Uuid> {
    let prefix = match id_or_prefix {
        IdOrPrefix::Full(uuid) => return Ok(*uuid),
        IdOrPrefix::Prefix(prefix) => prefix,
    };

    let mut ids = Vec::new();
    let mut query = ListJobs {
        limit: Some(200),
        ..ListJobs::default()
    };

    loop {
        let page = client
            .list_jobs(&query)
            .await
            .context("Failed to fetch jobs for ID resolution")?;
        ids.extend(page.items.into_iter().map(|job| job.id));

        match page.next_page_token {
            Some(token) => query.page_token = Some(token),
            None => break,
        }
    }

    match_prefix(&ids, prefix)
}

fn match_prefix(ids: &[Uuid], prefix: &str) -> Result<Uuid> {
    let matches: Vec<_> = ids
        .iter()
        .filter(|id| id.to_string().starts_with(prefix))
        .collect();

    match matches.as_slice() {
        [] => Err(anyhow!("No job found with ID starting with '{}'", prefix)),
        [id] => Ok(**id),
        _ => {
            let ids: Vec<String> = matches.iter().map(|id| id.to_string()).collect();
            Err(anyhow!(
                "Ambiguous prefix '{}' matches multiple jobs: {}",
                prefix,
                ids.join(", ")
            ))
        }
    }
}
