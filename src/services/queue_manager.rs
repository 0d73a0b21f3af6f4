use std::sync::Arc;
use uuid::Uuid;

use crate::db::store::{JobStore, StoreError};
use crate::models::job::{Job, JobCounts, JobPayload, JobStatus, JobType, NewJob};

/// Administrative surface over the job store: enqueue, cancel, retry and
/// stats. Never executes jobs; it mutates the same rows the worker
/// observes, relying on the store's conditional updates to race safely.
pub struct QueueManager {
    store: Arc<dyn JobStore>,
}

impl QueueManager {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    /// Insert a new job with status=queued and attempts=0.
    pub async fn enqueue_job(
        &self,
        batch_id: &str,
        project_id: &str,
        job_type: JobType,
        payload: JobPayload,
    ) -> Result<Job, QueueError> {
        if batch_id.trim().is_empty() {
            return Err(QueueError::Validation("batch_id is required".into()));
        }
        if project_id.trim().is_empty() {
            return Err(QueueError::Validation("project_id is required".into()));
        }

        let job = self
            .store
            .create_job(NewJob {
                batch_id: batch_id.to_string(),
                project_id: project_id.to_string(),
                job_type,
                payload,
            })
            .await?;

        tracing::info!(
            job_id = %job.id,
            batch_id = %job.batch_id,
            project_id = %job.project_id,
            job_type = %job.job_type,
            "Job enqueued"
        );

        Ok(job)
    }

    /// Cancel every queued or processing job of the project, optionally
    /// narrowed to a batch-id set. Idempotent: once all matching jobs are
    /// terminal, re-invoking returns 0 and writes nothing. Job rows only;
    /// resetting batch status is the caller's concern.
    pub async fn cancel_queued_jobs(
        &self,
        project_id: &str,
        batch_ids: Option<&[String]>,
    ) -> Result<u64, QueueError> {
        if project_id.trim().is_empty() {
            return Err(QueueError::Validation("project_id is required".into()));
        }

        let canceled = self.store.cancel_jobs(project_id, batch_ids).await?;
        if canceled > 0 {
            tracing::info!(project_id = %project_id, canceled, "Canceled jobs");
        }

        Ok(canceled)
    }

    /// Reset one failed job to queued with attempts=0.
    pub async fn retry_failed(&self, job_id: Uuid) -> Result<(), QueueError> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or(QueueError::NotFound(job_id))?;

        if job.status != JobStatus::Failed {
            return Err(QueueError::InvalidState {
                job_id,
                status: job.status,
            });
        }

        // The conditional reset can still lose to a concurrent writer
        // between the read above and this write.
        if !self.store.reset_failed_job(job_id).await? {
            let status = self
                .store
                .get_job(job_id)
                .await?
                .map(|j| j.status)
                .unwrap_or(job.status);
            return Err(QueueError::InvalidState { job_id, status });
        }

        tracing::info!(job_id = %job_id, "Failed job re-queued");
        Ok(())
    }

    /// Reset every failed job, optionally scoped to a project. Returns the
    /// number of jobs reset.
    pub async fn retry_all_failed(&self, project_id: Option<&str>) -> Result<u64, QueueError> {
        let count = self.store.reset_all_failed(project_id).await?;
        if count > 0 {
            tracing::info!(project_id = project_id.unwrap_or("*"), count, "Failed jobs re-queued");
        }
        Ok(count)
    }

    pub async fn get_job(&self, job_id: Uuid) -> Result<Option<Job>, QueueError> {
        Ok(self.store.get_job(job_id).await?)
    }

    /// Job counts by status across all projects.
    pub async fn get_stats(&self) -> Result<JobCounts, QueueError> {
        Ok(self.store.count_by_status(None).await?)
    }

    /// Job counts by status for one project.
    pub async fn get_project_stats(&self, project_id: &str) -> Result<JobCounts, QueueError> {
        Ok(self.store.count_by_status(Some(project_id)).await?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("job {0} not found")]
    NotFound(Uuid),

    #[error("job {job_id} is {status}, expected failed")]
    InvalidState { job_id: Uuid, status: JobStatus },

    #[error(transparent)]
    Store(#[from] StoreError),
}
