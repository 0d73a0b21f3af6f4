use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::models::batch::BatchStatus;
use crate::models::job::{Job, JobCounts, JobStatus, JobType, NewJob};
use crate::models::metric::NewProcessingMetric;

const JOB_COLUMNS: &str = "id, batch_id, project_id, job_type, status, attempts, payload, \
                           last_error, next_run_at, started_at, ended_at, created_at, updated_at";

/// Postgres-backed job store.
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn map_job(row: &PgRow) -> Result<Job, StoreError> {
    let job_type: String = row.try_get("job_type").map_err(StoreError::Sqlx)?;
    let status: String = row.try_get("status").map_err(StoreError::Sqlx)?;
    let payload: serde_json::Value = row.try_get("payload").map_err(StoreError::Sqlx)?;

    Ok(Job {
        id: row.try_get("id").map_err(StoreError::Sqlx)?,
        batch_id: row.try_get("batch_id").map_err(StoreError::Sqlx)?,
        project_id: row.try_get("project_id").map_err(StoreError::Sqlx)?,
        job_type: job_type.parse().unwrap_or(JobType::ProcessBatch),
        status: status.parse().unwrap_or(JobStatus::Queued),
        attempts: row.try_get("attempts").map_err(StoreError::Sqlx)?,
        payload: serde_json::from_value(payload)?,
        last_error: row.try_get("last_error").map_err(StoreError::Sqlx)?,
        next_run_at: row.try_get("next_run_at").map_err(StoreError::Sqlx)?,
        started_at: row.try_get("started_at").map_err(StoreError::Sqlx)?,
        ended_at: row.try_get("ended_at").map_err(StoreError::Sqlx)?,
        created_at: row.try_get("created_at").map_err(StoreError::Sqlx)?,
        updated_at: row.try_get("updated_at").map_err(StoreError::Sqlx)?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let payload = serde_json::to_value(&new.payload)?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO extraction_jobs (batch_id, project_id, job_type, status, attempts, payload)
            VALUES ($1, $2, $3, 'queued', 0, $4)
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(&new.batch_id)
        .bind(&new.project_id)
        .bind(new.job_type.to_string())
        .bind(payload)
        .fetch_one(&self.pool)
        .await?;

        map_job(&row)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM extraction_jobs
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_job).transpose()
    }

    async fn claimable_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {JOB_COLUMNS}
            FROM extraction_jobs
            WHERE status = 'queued' AND (next_run_at IS NULL OR next_run_at <= $1)
            ORDER BY created_at ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(map_job).collect()
    }

    async fn claim_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE extraction_jobs
            SET status = 'processing',
                attempts = attempts + 1,
                started_at = $2,
                next_run_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(map_job).transpose()
    }

    async fn mark_success(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'success', ended_at = $2, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(ended_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'queued', next_run_at = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(next_run_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'failed', ended_at = $2, last_error = $3, updated_at = NOW()
            WHERE id = $1 AND status = 'processing'
            "#,
        )
        .bind(id)
        .bind(ended_at)
        .bind(error)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn cancel_jobs(
        &self,
        project_id: &str,
        batch_ids: Option<&[String]>,
    ) -> Result<u64, StoreError> {
        let result = match batch_ids {
            Some(ids) => {
                sqlx::query(
                    r#"
                    UPDATE extraction_jobs
                    SET status = 'canceled', updated_at = NOW()
                    WHERE project_id = $1
                      AND batch_id = ANY($2)
                      AND status IN ('queued', 'processing')
                    "#,
                )
                .bind(project_id)
                .bind(ids)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE extraction_jobs
                    SET status = 'canceled', updated_at = NOW()
                    WHERE project_id = $1 AND status IN ('queued', 'processing')
                    "#,
                )
                .bind(project_id)
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn reset_failed_job(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE extraction_jobs
            SET status = 'queued', attempts = 0, last_error = NULL,
                next_run_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'failed'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn reset_all_failed(&self, project_id: Option<&str>) -> Result<u64, StoreError> {
        let result = match project_id {
            Some(pid) => {
                sqlx::query(
                    r#"
                    UPDATE extraction_jobs
                    SET status = 'queued', attempts = 0, last_error = NULL,
                        next_run_at = NULL, updated_at = NOW()
                    WHERE project_id = $1 AND status = 'failed'
                    "#,
                )
                .bind(pid)
                .execute(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    UPDATE extraction_jobs
                    SET status = 'queued', attempts = 0, last_error = NULL,
                        next_run_at = NULL, updated_at = NOW()
                    WHERE status = 'failed'
                    "#,
                )
                .execute(&self.pool)
                .await?
            }
        };

        Ok(result.rows_affected())
    }

    async fn count_by_status(&self, project_id: Option<&str>) -> Result<JobCounts, StoreError> {
        let rows = match project_id {
            Some(pid) => {
                sqlx::query(
                    r#"
                    SELECT status, COUNT(*) AS count
                    FROM extraction_jobs
                    WHERE project_id = $1
                    GROUP BY status
                    "#,
                )
                .bind(pid)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT status, COUNT(*) AS count
                    FROM extraction_jobs
                    GROUP BY status
                    "#,
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        let mut counts = JobCounts::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            let count = count as u64;
            match status.parse() {
                Ok(JobStatus::Queued) => counts.queued = count,
                Ok(JobStatus::Processing) => counts.processing = count,
                Ok(JobStatus::Success) => counts.success = count,
                Ok(JobStatus::Failed) => counts.failed = count,
                Ok(JobStatus::Canceled) => counts.canceled = count,
                Err(_) => {}
            }
        }

        Ok(counts)
    }

    async fn insert_metric(&self, metric: NewProcessingMetric) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO processing_metrics
                (batch_id, project_id, job_type, start_time, end_time, duration_ms,
                 status, error_message, image_count, extraction_count, model_used, tokens_used)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(&metric.batch_id)
        .bind(&metric.project_id)
        .bind(metric.job_type.to_string())
        .bind(metric.start_time)
        .bind(metric.end_time)
        .bind(metric.duration_ms)
        .bind(metric.status.to_string())
        .bind(&metric.error_message)
        .bind(metric.image_count)
        .bind(metric.extraction_count)
        .bind(&metric.model_used)
        .bind(metric.tokens_used)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE image_batches
            SET status = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(batch_id)
        .bind(status.to_string())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn batch_image_keys(&self, batch_id: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT image_key
            FROM batch_images
            WHERE batch_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(batch_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| r.try_get("image_key").map_err(StoreError::Sqlx))
            .collect()
    }
}
