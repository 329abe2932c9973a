//! Dispatch Queue Repository
//!
//! PostgreSQL implementation of the task queue port. Messages are rows in
//! `dispatch_queue`; a lease stamps a token on the row and pushes its
//! `visible_at` into the future. Concurrent consumers never block on each
//! other thanks to `FOR UPDATE SKIP LOCKED`.

use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Duration;
use uuid::Uuid;

use tessera_core::ports::queue::{
    DispatchMessage, Lease, LeaseToken, MessageId, QueueError, TaskQueue,
};

/// Dispatch messages in the `dispatch_queue` table
#[derive(Clone)]
pub struct PgTaskQueue {
    pool: PgPool,
}

impl PgTaskQueue {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TaskQueue for PgTaskQueue {
    async fn enqueue(
        &self,
        message: DispatchMessage,
        delay: Option<Duration>,
    ) -> Result<MessageId, QueueError> {
        let id = Uuid::new_v4();

        sqlx::query(
            r#"
            INSERT INTO dispatch_queue (id, job_id, visible_at, delivery_count, enqueued_at)
            VALUES ($1, $2, now() + make_interval(secs => $3), 0, now())
            "#,
        )
        .bind(id)
        .bind(message.job_id)
        .bind(delay.unwrap_or_default().as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(MessageId(id))
    }

    async fn lease(&self, visibility_timeout: Duration) -> Result<Option<Lease>, QueueError> {
        let token = Uuid::new_v4();

        let row = sqlx::query_as::<_, LeaseRow>(
            r#"
            UPDATE dispatch_queue
            SET lease_token = $1,
                visible_at = now() + make_interval(secs => $2),
                delivery_count = delivery_count + 1
            WHERE id = (
                SELECT id
                FROM dispatch_queue
                WHERE visible_at <= now()
                ORDER BY enqueued_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, job_id, delivery_count
            "#,
        )
        .bind(token)
        .bind(visibility_timeout.as_secs_f64())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(row.map(|row| Lease {
            token: LeaseToken(token),
            message_id: MessageId(row.id),
            message: DispatchMessage { job_id: row.job_id },
            delivery_count: row.delivery_count as u32,
        }))
    }

    async fn extend_lease(
        &self,
        token: LeaseToken,
        extension: Duration,
    ) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET visible_at = now() + make_interval(secs => $2)
            WHERE lease_token = $1 AND visible_at > now()
            "#,
        )
        .bind(token.0)
        .bind(extension.as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        held(result.rows_affected(), token)
    }

    async fn ack(&self, token: LeaseToken) -> Result<(), QueueError> {
        let result =
            sqlx::query("DELETE FROM dispatch_queue WHERE lease_token = $1 AND visible_at > now()")
                .bind(token.0)
                .execute(&self.pool)
                .await
                .map_err(backend)?;

        held(result.rows_affected(), token)
    }

    async fn nack(&self, token: LeaseToken, delay: Option<Duration>) -> Result<(), QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE dispatch_queue
            SET lease_token = NULL,
                visible_at = now() + make_interval(secs => $2)
            WHERE lease_token = $1 AND visible_at > now()
            "#,
        )
        .bind(token.0)
        .bind(delay.unwrap_or_default().as_secs_f64())
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        held(result.rows_affected(), token)
    }
}

/// A lease operation that touched no row means the lease had lapsed
fn held(rows_affected: u64, token: LeaseToken) -> Result<(), QueueError> {
    if rows_affected == 0 {
        Err(QueueError::LeaseLost(token))
    } else {
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> QueueError {
    QueueError::Backend(Box::new(e))
}

#[derive(sqlx::FromRow)]
struct LeaseRow {
    id: Uuid,
    job_id: Uuid,
    delivery_count: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untouched_row_means_lease_lost() {
        let token = LeaseToken(Uuid::new_v4());
        assert!(held(1, token).is_ok());
        assert!(matches!(held(0, token), Err(QueueError::LeaseLost(t)) if t == token));
    }
}
