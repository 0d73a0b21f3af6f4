use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::db::store::{JobStore, StoreError};
use crate::models::extraction::PipelineOutput;
use crate::models::job::Job;
use crate::models::metric::{MetricStatus, NewProcessingMetric};

/// Appends one immutable processing-metrics row per finished attempt and
/// feeds the operational counters. Cancellations never reach this type.
pub struct MetricsRecorder {
    store: Arc<dyn JobStore>,
}

impl MetricsRecorder {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn record_success(
        &self,
        job: &Job,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        output: &PipelineOutput,
    ) -> Result<(), StoreError> {
        let duration_ms = (end_time - start_time).num_milliseconds();

        self.store
            .insert_metric(NewProcessingMetric {
                batch_id: job.batch_id.clone(),
                project_id: job.project_id.clone(),
                job_type: job.job_type,
                start_time,
                end_time,
                duration_ms,
                status: MetricStatus::Success,
                error_message: None,
                image_count: output.image_count,
                extraction_count: Some(output.extraction_count),
                model_used: output.model_used.clone(),
                tokens_used: Some(output.tokens_used),
            })
            .await?;

        metrics::counter!("extraction_jobs_completed").increment(1);
        metrics::histogram!("extraction_job_duration_seconds")
            .record(duration_ms as f64 / 1000.0);

        Ok(())
    }

    pub async fn record_failure(
        &self,
        job: &Job,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        error_message: &str,
        image_count: i64,
    ) -> Result<(), StoreError> {
        let duration_ms = (end_time - start_time).num_milliseconds();

        self.store
            .insert_metric(NewProcessingMetric {
                batch_id: job.batch_id.clone(),
                project_id: job.project_id.clone(),
                job_type: job.job_type,
                start_time,
                end_time,
                duration_ms,
                status: MetricStatus::Failed,
                error_message: Some(error_message.to_string()),
                image_count,
                extraction_count: None,
                model_used: None,
                tokens_used: None,
            })
            .await?;

        metrics::counter!("extraction_jobs_failed").increment(1);
        metrics::histogram!("extraction_job_duration_seconds")
            .record(duration_ms as f64 / 1000.0);

        Ok(())
    }
}

/// Register descriptions for the operational metrics this crate emits.
pub fn describe_metrics() {
    metrics::describe_counter!(
        "extraction_jobs_completed",
        "Total extraction jobs that finished successfully"
    );
    metrics::describe_counter!(
        "extraction_jobs_failed",
        "Total extraction jobs that exhausted their retries"
    );
    metrics::describe_counter!(
        "extraction_jobs_retried",
        "Total attempts re-queued with backoff"
    );
    metrics::describe_histogram!(
        "extraction_job_duration_seconds",
        "Wall-clock time of one processing attempt"
    );
}
