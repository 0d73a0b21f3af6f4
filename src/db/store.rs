use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::batch::BatchStatus;
use crate::models::job::{Job, JobCounts, NewJob};
use crate::models::metric::NewProcessingMetric;

/// Persistence boundary for jobs, batches and metrics.
///
/// Every state transition is a conditional, single-row update gated on the
/// current status, so the worker, the queue manager and other worker
/// processes can race safely: the losing writer affects zero rows and the
/// method returns `false` (or `None` for claims).
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job with status=queued and attempts=0.
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Jobs with status=queued whose `next_run_at` is unset or has passed,
    /// oldest first.
    async fn claimable_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>, StoreError>;

    /// Atomic claim: queued -> processing, attempts incremented, start time
    /// recorded. Returns the claimed row, or `None` if another actor won.
    async fn claim_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Job>, StoreError>;

    /// processing -> success. Returns false if the job left `processing`
    /// in the meantime (e.g. canceled).
    async fn mark_success(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<bool, StoreError>;

    /// processing -> queued with a future `next_run_at` and the failure
    /// message preserved in `last_error`.
    async fn schedule_retry(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// processing -> failed, terminal.
    async fn mark_failed(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError>;

    /// queued|processing -> canceled for every job of the project
    /// (optionally narrowed to a batch-id set). Returns rows transitioned.
    async fn cancel_jobs(
        &self,
        project_id: &str,
        batch_ids: Option<&[String]>,
    ) -> Result<u64, StoreError>;

    /// failed -> queued with attempts, last_error and next_run_at reset.
    async fn reset_failed_job(&self, id: Uuid) -> Result<bool, StoreError>;

    /// Bulk variant of [`reset_failed_job`], optionally scoped to a project.
    ///
    /// [`reset_failed_job`]: JobStore::reset_failed_job
    async fn reset_all_failed(&self, project_id: Option<&str>) -> Result<u64, StoreError>;

    async fn count_by_status(&self, project_id: Option<&str>) -> Result<JobCounts, StoreError>;

    /// Append one processing-metric row. Rows are never updated or deleted.
    async fn insert_metric(&self, metric: NewProcessingMetric) -> Result<(), StoreError>;

    async fn set_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
    ) -> Result<(), StoreError>;

    /// Storage keys of every image in a batch, in upload order.
    async fn batch_image_keys(&self, batch_id: &str) -> Result<Vec<String>, StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("payload serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}
