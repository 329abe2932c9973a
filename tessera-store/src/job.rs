//! Job Repository
//!
//! PostgreSQL implementation of the state store port.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgExecutor, PgPool, Postgres, QueryBuilder};
use uuid::Uuid;

use tessera_core::domain::job::{Job, JobKind, JobStatus};
use tessera_core::dto::page::Page;
use tessera_core::ports::store::{
    JobFilter, JobPatch, PageRequest, Precondition, StateStore, StoreError,
};

const JOB_COLUMNS: &str = r#"
    id, kind, owner_id, status, input, output, error, parent_id, child_ids,
    batch_index, max_concurrent, progress, attempt_count, revision,
    created_at, updated_at, started_at, completed_at
"#;

/// Job records in the `jobs` table
#[derive(Clone)]
pub struct PgStateStore {
    pool: PgPool,
}

impl PgStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StateStore for PgStateStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        insert(&self.pool, job).await
    }

    async fn create_many(&self, jobs: &[Job]) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for job in jobs {
            insert(&mut *tx, job).await?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query_as::<_, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE id = $1",
            JOB_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        row.map(Job::try_from).transpose()
    }

    async fn conditional_update(
        &self,
        id: Uuid,
        expected: Precondition,
        patch: JobPatch,
    ) -> Result<bool, StoreError> {
        let kinds = permitted_kinds(&expected, &patch);
        if kinds.is_empty() {
            return Ok(false);
        }

        let output = patch.output.map(serde_json::to_value).transpose()?;
        let error = patch.error.map(serde_json::to_value).transpose()?;
        let progress = patch.progress.map(serde_json::to_value).transpose()?;

        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = COALESCE($3, status),
                output = COALESCE($4, output),
                error = COALESCE($5, error),
                attempt_count = COALESCE($6, attempt_count),
                progress = COALESCE($7, progress),
                started_at = COALESCE($8, started_at),
                completed_at = COALESCE($9, completed_at),
                updated_at = GREATEST(updated_at, $10),
                revision = revision + 1
            WHERE id = $1
              AND status = $2
              AND ($11::BIGINT IS NULL OR revision = $11)
              AND kind = ANY($12)
            "#,
        )
        .bind(id)
        .bind(status_to_string(expected.status))
        .bind(patch.status.map(status_to_string))
        .bind(output)
        .bind(error)
        .bind(patch.attempt_count.map(|n| n as i32))
        .bind(progress)
        .bind(patch.started_at)
        .bind(patch.completed_at)
        .bind(Utc::now())
        .bind(expected.revision.map(|r| r as i64))
        .bind(kinds)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn query(&self, filter: &JobFilter, page: PageRequest) -> Result<Page<Job>, StoreError> {
        let mut qb: QueryBuilder<Postgres> =
            QueryBuilder::new(format!("SELECT {} FROM jobs WHERE TRUE", JOB_COLUMNS));

        if let Some(owner_id) = &filter.owner_id {
            qb.push(" AND owner_id = ").push_bind(owner_id.clone());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ").push_bind(status_to_string(status));
        }
        if let Some(kind) = filter.kind {
            qb.push(" AND kind = ").push_bind(kind_to_string(kind));
        }
        if let Some(parent_id) = filter.parent_id {
            qb.push(" AND parent_id = ").push_bind(parent_id);
        }
        if filter.top_level_only {
            qb.push(" AND parent_id IS NULL");
        }

        if filter.parent_id.is_some() {
            qb.push(" ORDER BY batch_index ASC");
        } else {
            qb.push(" ORDER BY created_at DESC, id DESC");
        }

        // One extra row tells whether another page exists
        qb.push(" LIMIT ")
            .push_bind(page.limit as i64 + 1)
            .push(" OFFSET ")
            .push_bind(page.offset as i64);

        let rows = qb
            .build_query_as::<JobRow>()
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let jobs = rows
            .into_iter()
            .map(Job::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(page.paginate(jobs))
    }

    async fn count_active(&self, owner_id: &str) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM jobs
            WHERE owner_id = $1
              AND parent_id IS NULL
              AND status NOT IN ('Completed', 'Failed', 'PartiallyCompleted', 'Cancelled')
            "#,
        )
        .bind(owner_id)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        Ok(count as u64)
    }
}

async fn insert<'e, E: PgExecutor<'e>>(executor: E, job: &Job) -> Result<(), StoreError> {
    let output = job.output.as_ref().map(serde_json::to_value).transpose()?;
    let error = job.error.as_ref().map(serde_json::to_value).transpose()?;
    let progress = job.progress.as_ref().map(serde_json::to_value).transpose()?;

    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, kind, owner_id, status, input, output, error, parent_id, child_ids,
            batch_index, max_concurrent, progress, attempt_count, revision,
            created_at, updated_at, started_at, completed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
        "#,
    )
    .bind(job.id)
    .bind(kind_to_string(job.kind))
    .bind(&job.owner_id)
    .bind(status_to_string(job.status))
    .bind(&job.input)
    .bind(output)
    .bind(error)
    .bind(job.parent_id)
    .bind(&job.child_ids)
    .bind(job.batch_index.map(|i| i as i32))
    .bind(job.max_concurrent.map(|n| n as i32))
    .bind(progress)
    .bind(job.attempt_count as i32)
    .bind(job.revision as i64)
    .bind(job.created_at)
    .bind(job.updated_at)
    .bind(job.started_at)
    .bind(job.completed_at)
    .execute(executor)
    .await
    .map_err(|e| {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StoreError::Duplicate(job.id);
            }
        }
        backend(e)
    })?;

    Ok(())
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

// =============================================================================
// Helper Functions
// =============================================================================

fn status_to_string(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "Pending",
        JobStatus::Queued => "Queued",
        JobStatus::Running => "Running",
        JobStatus::Completed => "Completed",
        JobStatus::Failed => "Failed",
        JobStatus::PartiallyCompleted => "PartiallyCompleted",
        JobStatus::Cancelled => "Cancelled",
    }
}

fn string_to_status(s: &str) -> Result<JobStatus, StoreError> {
    match s {
        "Pending" => Ok(JobStatus::Pending),
        "Queued" => Ok(JobStatus::Queued),
        "Running" => Ok(JobStatus::Running),
        "Completed" => Ok(JobStatus::Completed),
        "Failed" => Ok(JobStatus::Failed),
        "PartiallyCompleted" => Ok(JobStatus::PartiallyCompleted),
        "Cancelled" => Ok(JobStatus::Cancelled),
        other => Err(StoreError::Backend(
            format!("unknown job status: {}", other).into(),
        )),
    }
}

fn kind_to_string(kind: JobKind) -> &'static str {
    match kind {
        JobKind::Individual => "Individual",
        JobKind::BatchParent => "BatchParent",
        JobKind::BatchChild => "BatchChild",
    }
}

/// Kind column values for which the patched status is a lifecycle edge
fn permitted_kinds(expected: &Precondition, patch: &JobPatch) -> Vec<String> {
    expected
        .permitted_kinds(patch)
        .into_iter()
        .map(|kind| kind_to_string(kind).to_string())
        .collect()
}

fn string_to_kind(s: &str) -> Result<JobKind, StoreError> {
    match s {
        "Individual" => Ok(JobKind::Individual),
        "BatchParent" => Ok(JobKind::BatchParent),
        "BatchChild" => Ok(JobKind::BatchChild),
        other => Err(StoreError::Backend(
            format!("unknown job kind: {}", other).into(),
        )),
    }
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    owner_id: String,
    status: String,
    input: JsonValue,
    output: Option<JsonValue>,
    error: Option<JsonValue>,
    parent_id: Option<Uuid>,
    child_ids: Vec<Uuid>,
    batch_index: Option<i32>,
    max_concurrent: Option<i32>,
    progress: Option<JsonValue>,
    attempt_count: i32,
    revision: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = StoreError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        Ok(Job {
            id: row.id,
            kind: string_to_kind(&row.kind)?,
            owner_id: row.owner_id,
            status: string_to_status(&row.status)?,
            input: row.input,
            output: row.output.map(serde_json::from_value).transpose()?,
            error: row.error.map(serde_json::from_value).transpose()?,
            parent_id: row.parent_id,
            child_ids: row.child_ids,
            batch_index: row.batch_index.map(|i| i as u32),
            max_concurrent: row.max_concurrent.map(|n| n as u32),
            progress: row.progress.map(serde_json::from_value).transpose()?,
            attempt_count: row.attempt_count as u32,
            revision: row.revision as u64,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}
