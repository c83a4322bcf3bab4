//! Postgres-backed job store.
//!
//! Locator uniqueness is a partial unique index over non-failed rows, so
//! the dedupe check and the insert are one atomic statement. Status
//! transitions take a single-row lock (`SELECT ... FOR UPDATE`) and are
//! validated through the same domain rules as the in-memory store.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row};

use docsmith_core::{CallerId, Job, JobId, JobStatus};

use super::{CreateOutcome, JobStore, JobStoreError, StatusFields};

pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the jobs table and the partial uniqueness index.
    /// Idempotent; runs at worker/API startup.
    pub async fn ensure_schema(&self) -> Result<(), JobStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id UUID PRIMARY KEY,
                source TEXT NOT NULL,
                status TEXT NOT NULL,
                error TEXT,
                artifact_url TEXT,
                pull_request_url TEXT,
                caller_id UUID,
                has_write_access BOOLEAN NOT NULL DEFAULT FALSE,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(JobStoreError::storage)?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS jobs_source_active
            ON jobs (source) WHERE status <> 'failed'
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(JobStoreError::storage)?;

        Ok(())
    }

    fn row_to_job(row: &sqlx::postgres::PgRow) -> Result<Job, JobStoreError> {
        let status: String = row.try_get("status").map_err(JobStoreError::storage)?;
        let status = JobStatus::from_str(&status)?;

        Ok(Job {
            id: JobId::from_uuid(row.try_get("id").map_err(JobStoreError::storage)?),
            source: row.try_get("source").map_err(JobStoreError::storage)?,
            status,
            error: row.try_get("error").map_err(JobStoreError::storage)?,
            artifact_url: row
                .try_get("artifact_url")
                .map_err(JobStoreError::storage)?,
            pull_request_url: row
                .try_get("pull_request_url")
                .map_err(JobStoreError::storage)?,
            caller_id: row
                .try_get::<Option<uuid::Uuid>, _>("caller_id")
                .map_err(JobStoreError::storage)?
                .map(CallerId::from_uuid),
            has_write_access: row
                .try_get("has_write_access")
                .map_err(JobStoreError::storage)?,
            created_at: row.try_get("created_at").map_err(JobStoreError::storage)?,
            updated_at: row.try_get("updated_at").map_err(JobStoreError::storage)?,
        })
    }
}

const JOB_COLUMNS: &str = "id, source, status, error, artifact_url, pull_request_url, \
                           caller_id, has_write_access, created_at, updated_at";

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn create(&self, job: Job) -> Result<CreateOutcome, JobStoreError> {
        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO jobs ({JOB_COLUMNS})
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (source) WHERE status <> 'failed' DO NOTHING
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(job.id.as_uuid())
        .bind(&job.source)
        .bind(job.status.as_str())
        .bind(&job.error)
        .bind(&job.artifact_url)
        .bind(&job.pull_request_url)
        .bind(job.caller_id.as_ref().map(|c| *c.as_uuid()))
        .bind(job.has_write_access)
        .bind(job.created_at)
        .bind(job.updated_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(JobStoreError::storage)?;

        if let Some(row) = inserted {
            return Ok(CreateOutcome::Created(Self::row_to_job(&row)?));
        }

        // Lost the race (or a non-failed job already existed): hand back
        // the record occupying the locator.
        let existing = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE source = $1 AND status <> 'failed'",
        ))
        .bind(&job.source)
        .fetch_optional(&self.pool)
        .await
        .map_err(JobStoreError::storage)?
        .ok_or_else(|| JobStoreError::Storage("conflicting job vanished".to_string()))?;

        Ok(CreateOutcome::Existing(Self::row_to_job(&existing)?))
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        let row = sqlx::query(&format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(JobStoreError::storage)?;

        row.map(|r| Self::row_to_job(&r)).transpose()
    }

    async fn list(&self, skip: u64, limit: u64) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs ORDER BY created_at DESC, id DESC OFFSET $1 LIMIT $2",
        ))
        .bind(skip as i64)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(JobStoreError::storage)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn set_status(
        &self,
        id: JobId,
        next: JobStatus,
        fields: StatusFields,
    ) -> Result<Job, JobStoreError> {
        let mut tx = self.pool.begin().await.map_err(JobStoreError::storage)?;

        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE id = $1 FOR UPDATE",
        ))
        .bind(id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(JobStoreError::storage)?
        .ok_or(JobStoreError::NotFound(id))?;

        let mut job = Self::row_to_job(&row)?;
        // Same validation as the in-memory store: forward-only, terminal
        // invariants enforced by the domain type.
        match next {
            JobStatus::Processing => job.mark_processing()?,
            JobStatus::Completed => {
                job.mark_completed(fields.artifact_url, fields.pull_request_url)?
            }
            JobStatus::Failed => job.mark_failed(fields.error.unwrap_or_default())?,
            JobStatus::Pending => {
                return Err(docsmith_core::DomainError::illegal_transition(format!(
                    "{} -> pending",
                    job.status
                ))
                .into());
            }
        }

        sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, error = $3, artifact_url = $4,
                pull_request_url = $5, updated_at = $6
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .bind(job.status.as_str())
        .bind(&job.error)
        .bind(&job.artifact_url)
        .bind(&job.pull_request_url)
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(JobStoreError::storage)?;

        tx.commit().await.map_err(JobStoreError::storage)?;
        Ok(job)
    }

    async fn requeue_crashed(&self, id: JobId) -> Result<Job, JobStoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE jobs SET status = 'pending', updated_at = $2
            WHERE id = $1 AND status = 'processing'
            RETURNING {JOB_COLUMNS}
            "#,
        ))
        .bind(id.as_uuid())
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await
        .map_err(JobStoreError::storage)?
        .ok_or(JobStoreError::NotFound(id))?;

        Self::row_to_job(&row)
    }

    async fn delete(&self, id: JobId) -> Result<(), JobStoreError> {
        let result = sqlx::query("DELETE FROM jobs WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(JobStoreError::storage)?;

        if result.rows_affected() == 0 {
            return Err(JobStoreError::NotFound(id));
        }
        Ok(())
    }

    async fn list_pending_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Job>, JobStoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE status = 'pending' AND created_at < $1",
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(JobStoreError::storage)?;

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn sweep_terminal_before(&self, cutoff: DateTime<Utc>) -> Result<u64, JobStoreError> {
        let result = sqlx::query(
            "DELETE FROM jobs WHERE status IN ('completed', 'failed') AND updated_at < $1",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(JobStoreError::storage)?;

        Ok(result.rows_affected())
    }
}
