use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

use crate::models::job::JobType;

/// Outcome recorded for a finished processing attempt. Cancellations are
/// not an outcome; they produce no metric row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MetricStatus {
    Success,
    Failed,
}

/// One append-only row per completed attempt (success or terminal failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingMetric {
    pub id: Uuid,
    pub batch_id: String,
    pub project_id: String,
    pub job_type: JobType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: MetricStatus,
    pub error_message: Option<String>,
    pub image_count: i64,
    pub extraction_count: Option<i64>,
    pub model_used: Option<String>,
    pub tokens_used: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Metric fields supplied by the worker; ids and timestamps are assigned
/// by the store on insert.
#[derive(Debug, Clone)]
pub struct NewProcessingMetric {
    pub batch_id: String,
    pub project_id: String,
    pub job_type: JobType,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub duration_ms: i64,
    pub status: MetricStatus,
    pub error_message: Option<String>,
    pub image_count: i64,
    pub extraction_count: Option<i64>,
    pub model_used: Option<String>,
    pub tokens_used: Option<i64>,
}
