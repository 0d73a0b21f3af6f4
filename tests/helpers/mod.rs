//! Test doubles for worker/manager scenario tests: an in-memory job store
//! and a pipeline whose outcomes are scripted per attempt.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use batch_extract::config::WorkerConfig;
use batch_extract::db::store::{JobStore, StoreError};
use batch_extract::models::batch::BatchStatus;
use batch_extract::models::extraction::PipelineOutput;
use batch_extract::models::job::{Job, JobCounts, JobStatus, NewJob};
use batch_extract::models::metric::NewProcessingMetric;
use batch_extract::services::pipeline::{BatchPipeline, PipelineError};
use batch_extract::services::storage::StorageError;

/// Worker tunables sized for fast tests.
pub fn test_config() -> WorkerConfig {
    WorkerConfig {
        max_concurrency: 2,
        requests_per_minute: 100,
        retry_delay_ms: 0,
        max_retries: 3,
        poll_interval_ms: 10,
    }
}

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<Uuid, Job>,
    insertion_order: Vec<Uuid>,
    metrics: Vec<NewProcessingMetric>,
    batches: HashMap<String, BatchStatus>,
}

/// In-memory [`JobStore`] with the same conditional-update semantics as
/// the Postgres implementation.
#[derive(Default)]
pub struct MemoryJobStore {
    state: Mutex<MemoryState>,
}

impl MemoryJobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn metrics(&self) -> Vec<NewProcessingMetric> {
        self.state.lock().unwrap().metrics.clone()
    }

    pub fn batch_status(&self, batch_id: &str) -> Option<BatchStatus> {
        self.state.lock().unwrap().batches.get(batch_id).copied()
    }

    /// Force a job into a given state, for seeding scenarios.
    pub fn force_status(&self, id: Uuid, status: JobStatus, attempts: i32, last_error: Option<&str>) {
        let mut state = self.state.lock().unwrap();
        if let Some(job) = state.jobs.get_mut(&id) {
            job.status = status;
            job.attempts = attempts;
            job.last_error = last_error.map(|e| e.to_string());
        }
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create_job(&self, new: NewJob) -> Result<Job, StoreError> {
        let now = Utc::now();
        let job = Job {
            id: Uuid::new_v4(),
            batch_id: new.batch_id,
            project_id: new.project_id,
            job_type: new.job_type,
            status: JobStatus::Queued,
            attempts: 0,
            payload: new.payload,
            last_error: None,
            next_run_at: None,
            started_at: None,
            ended_at: None,
            created_at: now,
            updated_at: now,
        };
        let mut state = self.state.lock().unwrap();
        state.insertion_order.push(job.id);
        state.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.state.lock().unwrap().jobs.get(&id).cloned())
    }

    async fn claimable_jobs(&self, now: DateTime<Utc>, limit: i64) -> Result<Vec<Job>, StoreError> {
        let state = self.state.lock().unwrap();
        let jobs = state
            .insertion_order
            .iter()
            .filter_map(|id| state.jobs.get(id))
            .filter(|j| {
                j.status == JobStatus::Queued && j.next_run_at.map(|t| t <= now).unwrap_or(true)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect();
        Ok(jobs)
    }

    async fn claim_job(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Job>, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Queued => {
                job.status = JobStatus::Processing;
                job.attempts += 1;
                job.started_at = Some(now);
                job.next_run_at = None;
                job.updated_at = now;
                Ok(Some(job.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_success(&self, id: Uuid, ended_at: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Success;
                job.ended_at = Some(ended_at);
                job.updated_at = ended_at;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn schedule_retry(
        &self,
        id: Uuid,
        next_run_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Queued;
                job.next_run_at = Some(next_run_at);
                job.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        ended_at: DateTime<Utc>,
        error: &str,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Processing => {
                job.status = JobStatus::Failed;
                job.ended_at = Some(ended_at);
                job.last_error = Some(error.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn cancel_jobs(
        &self,
        project_id: &str,
        batch_ids: Option<&[String]>,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut canceled = 0;
        for job in state.jobs.values_mut() {
            let in_scope = job.project_id == project_id
                && batch_ids.map(|ids| ids.contains(&job.batch_id)).unwrap_or(true);
            if in_scope && matches!(job.status, JobStatus::Queued | JobStatus::Processing) {
                job.status = JobStatus::Canceled;
                canceled += 1;
            }
        }
        Ok(canceled)
    }

    async fn reset_failed_job(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut state = self.state.lock().unwrap();
        match state.jobs.get_mut(&id) {
            Some(job) if job.status == JobStatus::Failed => {
                job.status = JobStatus::Queued;
                job.attempts = 0;
                job.last_error = None;
                job.next_run_at = None;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_all_failed(&self, project_id: Option<&str>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().unwrap();
        let mut count = 0;
        for job in state.jobs.values_mut() {
            let in_scope = project_id.map(|p| job.project_id == p).unwrap_or(true);
            if in_scope && job.status == JobStatus::Failed {
                job.status = JobStatus::Queued;
                job.attempts = 0;
                job.last_error = None;
                job.next_run_at = None;
                count += 1;
            }
        }
        Ok(count)
    }

    async fn count_by_status(&self, project_id: Option<&str>) -> Result<JobCounts, StoreError> {
        let state = self.state.lock().unwrap();
        let mut counts = JobCounts::default();
        for job in state.jobs.values() {
            if project_id.map(|p| job.project_id != p).unwrap_or(false) {
                continue;
            }
            match job.status {
                JobStatus::Queued => counts.queued += 1,
                JobStatus::Processing => counts.processing += 1,
                JobStatus::Success => counts.success += 1,
                JobStatus::Failed => counts.failed += 1,
                JobStatus::Canceled => counts.canceled += 1,
            }
        }
        Ok(counts)
    }

    async fn insert_metric(&self, metric: NewProcessingMetric) -> Result<(), StoreError> {
        self.state.lock().unwrap().metrics.push(metric);
        Ok(())
    }

    async fn set_batch_status(
        &self,
        batch_id: &str,
        status: BatchStatus,
    ) -> Result<(), StoreError> {
        self.state
            .lock()
            .unwrap()
            .batches
            .insert(batch_id.to_string(), status);
        Ok(())
    }

    async fn batch_image_keys(&self, _batch_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(Vec::new())
    }
}

/// Scripted outcome for one pipeline attempt.
pub enum Attempt {
    Succeed(PipelineOutput),
    Fail(&'static str),
    /// Park until the test fires the notify, then succeed.
    WaitThenSucceed(Arc<Notify>),
}

/// Pipeline double that plays back a script, one entry per attempt.
pub struct ScriptedPipeline {
    script: Mutex<VecDeque<Attempt>>,
    calls: AtomicUsize,
}

impl ScriptedPipeline {
    pub fn new(script: Vec<Attempt>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BatchPipeline for ScriptedPipeline {
    async fn process(&self, _job: &Job) -> Result<PipelineOutput, PipelineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let attempt = self.script.lock().unwrap().pop_front();
        match attempt {
            Some(Attempt::Succeed(output)) => Ok(output),
            Some(Attempt::Fail(message)) => {
                Err(PipelineError::Storage(StorageError::Config(message.into())))
            }
            Some(Attempt::WaitThenSucceed(gate)) => {
                gate.notified().await;
                Ok(PipelineOutput::default())
            }
            None => Ok(PipelineOutput::default()),
        }
    }
}

/// Poll a job until `predicate` holds, panicking after two seconds.
pub async fn wait_for_job<F>(store: &Arc<MemoryJobStore>, id: Uuid, predicate: F) -> Job
where
    F: Fn(&Job) -> bool,
{
    for _ in 0..400 {
        if let Ok(Some(job)) = store.get_job(id).await {
            if predicate(&job) {
                return job;
            }
        }
        sleep(Duration::from_millis(5)).await;
    }
    panic!("job {id} did not reach the expected state in time");
}
