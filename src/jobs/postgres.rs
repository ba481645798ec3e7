//! Postgres-backed job queue
//!
//! Jobs live in the `job_queue` table. A partial unique index on
//! `(kind, subscription_id)` over queued and running rows is the
//! deduplication key; workers claim rows with `FOR UPDATE SKIP LOCKED` so
//! several processes can share one queue.
//!
//! A claimed row carries a lease: the claiming queue's owner id and the claim
//! time. Only the owner can complete or fail the row. A row whose lease has
//! expired is treated as abandoned by a crashed worker and may be claimed
//! again, counting as a failed attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{retry_delay, Enqueued, Job, JobData, JobQueue};
use crate::error::Result;

#[derive(Debug, FromRow)]
struct JobRow {
    id: Uuid,
    kind: String,
    subscription_id: i64,
    attempts: i32,
    run_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for JobData {
    type Error = crate::error::AppError;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(JobData {
            job_id: row.id,
            job: Job {
                kind: row.kind.parse()?,
                subscription_id: row.subscription_id,
            },
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            run_at: row.run_at,
        })
    }
}

#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    /// Lease owner written to every row this queue claims
    owner: String,
    max_retries: u32,
    retry_backoff_seconds: u64,
    lease_seconds: u64,
}

impl PgJobQueue {
    pub fn new(
        pool: PgPool,
        max_retries: u32,
        retry_backoff_seconds: u64,
        lease_seconds: u64,
    ) -> Self {
        Self {
            pool,
            owner: Uuid::new_v4().to_string(),
            max_retries,
            retry_backoff_seconds,
            lease_seconds,
        }
    }

    /// Identity recorded as `locked_by` on claimed rows
    pub fn owner(&self) -> &str {
        &self.owner
    }
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: Job) -> Result<Enqueued> {
        let job_id = Uuid::new_v4();
        let (returned_id, inserted): (Uuid, bool) = sqlx::query_as(
            r#"
            INSERT INTO job_queue (id, kind, subscription_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (kind, subscription_id) WHERE state IN ('queued', 'running')
            DO UPDATE SET rerun = job_queue.rerun OR job_queue.state = 'running'
            RETURNING id, (xmax = 0) AS inserted
            "#,
        )
        .bind(job_id)
        .bind(job.kind.as_str())
        .bind(job.subscription_id)
        .fetch_one(&self.pool)
        .await?;

        if inserted {
            Ok(Enqueued::New(returned_id))
        } else {
            Ok(Enqueued::Deduplicated)
        }
    }

    async fn dequeue(&self) -> Result<Option<JobData>> {
        let row = sqlx::query_as::<_, JobRow>(
            r#"
            UPDATE job_queue
            SET state = 'running',
                attempts = CASE WHEN state = 'running' THEN attempts + 1 ELSE attempts END,
                locked_by = $1,
                locked_at = NOW()
            WHERE id = (
                SELECT id
                FROM job_queue
                WHERE (state = 'queued' AND run_at <= NOW())
                   OR (state = 'running'
                       AND locked_at < NOW() - make_interval(secs => $2))
                ORDER BY run_at, created_at
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, kind, subscription_id, attempts, run_at
            "#,
        )
        .bind(&self.owner)
        .bind(self.lease_seconds as f64)
        .fetch_optional(&self.pool)
        .await?;

        row.map(JobData::try_from).transpose()
    }

    async fn complete(&self, data: &JobData) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let deleted = sqlx::query(
            r#"
            DELETE FROM job_queue
            WHERE id = $1 AND state = 'running' AND locked_by = $2 AND NOT rerun
            "#,
        )
        .bind(data.job_id)
        .bind(&self.owner)
        .execute(&mut *tx)
        .await?;

        if deleted.rows_affected() == 0 {
            // A submission arrived mid-run: recycle the row as a fresh job
            sqlx::query(
                r#"
                UPDATE job_queue
                SET id = $3, state = 'queued', rerun = FALSE, attempts = 0,
                    run_at = NOW(), last_error = NULL, locked_by = NULL, locked_at = NULL
                WHERE id = $1 AND state = 'running' AND locked_by = $2 AND rerun
                "#,
            )
            .bind(data.job_id)
            .bind(&self.owner)
            .bind(Uuid::new_v4())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fail(&self, data: &JobData, error: &str) -> Result<()> {
        if data.attempts < self.max_retries {
            let run_at = Utc::now() + retry_delay(self.retry_backoff_seconds, data.attempts);
            sqlx::query(
                r#"
                UPDATE job_queue
                SET state = 'queued', attempts = attempts + 1, rerun = FALSE,
                    run_at = $3, last_error = $4, locked_by = NULL, locked_at = NULL
                WHERE id = $1 AND state = 'running' AND locked_by = $2
                "#,
            )
            .bind(data.job_id)
            .bind(&self.owner)
            .bind(run_at)
            .bind(error)
            .execute(&self.pool)
            .await?;
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let rerun: Option<bool> = sqlx::query_scalar(
            r#"
            UPDATE job_queue
            SET state = 'failed', last_error = $3, locked_by = NULL, locked_at = NULL
            WHERE id = $1 AND state = 'running' AND locked_by = $2
            RETURNING rerun
            "#,
        )
        .bind(data.job_id)
        .bind(&self.owner)
        .bind(error)
        .fetch_optional(&mut *tx)
        .await?;

        if rerun == Some(true) {
            sqlx::query("INSERT INTO job_queue (id, kind, subscription_id) VALUES ($1, $2, $3)")
                .bind(Uuid::new_v4())
                .bind(data.job.kind.as_str())
                .bind(data.job.subscription_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
