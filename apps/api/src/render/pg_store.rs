//! PostgreSQL-backed `JobStore`.
//!
//! Claims use `FOR UPDATE SKIP LOCKED` so several API instances can share one
//! queue without double-dispatch. Other transitions lock the row, run the
//! shared state machine in Rust, and write the whole job back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::models::render_job::{RenderJobRow, RENDER_JOB_COLUMNS};
use crate::render::job::{JobStatus, RenderInput, RenderJob, Transition};
use crate::render::store::{JobStore, JobStoreError};

#[derive(Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn into_job(row: RenderJobRow) -> Result<RenderJob, JobStoreError> {
    RenderJob::try_from(row).map_err(JobStoreError::Database)
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create(
        &self,
        owner_id: Uuid,
        input: RenderInput,
    ) -> Result<RenderJob, JobStoreError> {
        JobStoreError::check_input(owner_id, &input)?;
        let job = RenderJob::new(owner_id, input, Utc::now());

        sqlx::query(
            r#"
            INSERT INTO render_jobs
                (id, owner_id, resume_id, template_id, status, progress, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(job.owner_id)
        .bind(job.input.resume_id)
        .bind(job.input.template_id)
        .bind(job.status.as_str())
        .bind(job.progress as i16)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(job_id = %job.id, owner_id = %owner_id, "Render job created");
        Ok(job)
    }

    async fn get(&self, id: Uuid, requester_id: Uuid) -> Result<RenderJob, JobStoreError> {
        let row: Option<RenderJobRow> = sqlx::query_as(&format!(
            "SELECT {RENDER_JOB_COLUMNS} FROM render_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let job = into_job(row.ok_or(JobStoreError::NotFound(id))?)?;
        if !job.is_owned_by(requester_id) {
            return Err(JobStoreError::Forbidden {
                job_id: id,
                requester_id,
            });
        }
        Ok(job)
    }

    async fn transition(
        &self,
        id: Uuid,
        transition: Transition,
    ) -> Result<RenderJob, JobStoreError> {
        let mut tx = self.pool.begin().await?;

        let row: Option<RenderJobRow> = sqlx::query_as(&format!(
            "SELECT {RENDER_JOB_COLUMNS} FROM render_jobs WHERE id = $1 FOR UPDATE"
        ))
        .bind(id)
        .fetch_optional(&mut *tx)
        .await?;

        let mut job = into_job(row.ok_or(JobStoreError::NotFound(id))?)?;
        job.apply(transition, Utc::now())
            .map_err(|e| JobStoreError::rejected(id, e))?;

        sqlx::query(
            r#"
            UPDATE render_jobs
            SET status = $2,
                progress = $3,
                result_file_name = $4,
                result_content_type = $5,
                error_message = $6,
                updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.as_str())
        .bind(job.progress as i16)
        .bind(job.result.as_ref().map(|r| r.file_name.as_str()))
        .bind(job.result.as_ref().map(|r| r.content_type.as_str()))
        .bind(job.error.as_deref())
        .bind(job.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(job)
    }

    async fn claim_next(&self) -> Result<Option<RenderJob>, JobStoreError> {
        let row: Option<RenderJobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE render_jobs
            SET status = $1, progress = 0, updated_at = NOW()
            WHERE id = (
                SELECT id FROM render_jobs
                WHERE status = $2
                ORDER BY seq ASC
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {RENDER_JOB_COLUMNS}
            "#
        ))
        .bind(JobStatus::Processing.as_str())
        .bind(JobStatus::Pending.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_job).transpose()
    }

    async fn find_by_file_name(
        &self,
        file_name: &str,
    ) -> Result<Option<RenderJob>, JobStoreError> {
        let row: Option<RenderJobRow> = sqlx::query_as(&format!(
            "SELECT {RENDER_JOB_COLUMNS} FROM render_jobs WHERE result_file_name = $1 AND status = $2"
        ))
        .bind(file_name)
        .bind(JobStatus::Completed.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(into_job).transpose()
    }

    async fn count_by_status(&self, status: JobStatus) -> Result<usize, JobStoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM render_jobs WHERE status = $1")
            .bind(status.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as usize)
    }

    async fn expire(
        &self,
        updated_before: DateTime<Utc>,
    ) -> Result<Vec<RenderJob>, JobStoreError> {
        let rows: Vec<RenderJobRow> = sqlx::query_as(&format!(
            r#"
            DELETE FROM render_jobs
            WHERE status IN ($1, $2) AND updated_at < $3
            RETURNING {RENDER_JOB_COLUMNS}
            "#
        ))
        .bind(JobStatus::Completed.as_str())
        .bind(JobStatus::Failed.as_str())
        .bind(updated_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(into_job).collect()
    }
}
