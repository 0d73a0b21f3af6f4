use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Status of an extraction job in the durable queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Processing,
    Success,
    Failed,
    Canceled,
}

impl JobStatus {
    /// Terminal states are never claimed again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Success | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

/// Kind of pipeline a job runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobType {
    ProcessBatch,
    ProcessRedo,
}

/// Job-type-specific data carried alongside the job row.
///
/// `process_batch` runs every image in the batch; `process_redo` re-runs
/// exactly the keys listed in `image_keys`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_preset: Option<String>,
}

/// A durable unit of work: one batch-processing or redo attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub batch_id: String,
    pub project_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub attempts: i32,
    pub payload: JobPayload,
    pub last_error: Option<String>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields required to insert a new job (status starts at queued, attempts at 0).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub batch_id: String,
    pub project_id: String,
    pub job_type: JobType,
    pub payload: JobPayload,
}

/// Per-status job counts, globally or scoped to a project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCounts {
    pub queued: u64,
    pub processing: u64,
    pub success: u64,
    pub failed: u64,
    pub canceled: u64,
}
