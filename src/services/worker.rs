use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::db::store::{JobStore, StoreError};
use crate::models::batch::BatchStatus;
use crate::models::job::{Job, JobStatus};
use crate::services::metrics::MetricsRecorder;
use crate::services::pipeline::BatchPipeline;

/// The worker's own view, distinct from the connection pool's stats.
#[derive(Debug, Clone, Serialize)]
pub struct WorkerStats {
    pub running: bool,
    pub active_jobs: usize,
    pub poll_interval_ms: u64,
    pub max_retries: i32,
    pub retry_delay_ms: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    #[error("worker is already running")]
    AlreadyRunning,
}

struct RunningLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

struct WorkerCtx {
    config: WorkerConfig,
    store: Arc<dyn JobStore>,
    pipeline: Arc<dyn BatchPipeline>,
    metrics: MetricsRecorder,
    active_jobs: AtomicUsize,
}

/// Background worker that drains the durable job queue.
///
/// Once per polling tick it claims up to `max_concurrency` eligible jobs
/// (oldest first, atomic queued -> processing transition) and runs each
/// job's pipeline. Success, retry-with-backoff and terminal failure are
/// decided here; the pipeline only reports the attempt's outcome.
pub struct QueueWorker {
    ctx: Arc<WorkerCtx>,
    running: Mutex<Option<RunningLoop>>,
}

impl QueueWorker {
    pub fn new(
        config: WorkerConfig,
        store: Arc<dyn JobStore>,
        pipeline: Arc<dyn BatchPipeline>,
    ) -> Self {
        let metrics = MetricsRecorder::new(Arc::clone(&store));
        Self {
            ctx: Arc::new(WorkerCtx {
                config,
                store,
                pipeline,
                metrics,
                active_jobs: AtomicUsize::new(0),
            }),
            running: Mutex::new(None),
        }
    }

    /// Begin the claim loop.
    pub fn start(&self) -> Result<(), WorkerError> {
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return Err(WorkerError::AlreadyRunning);
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_loop(Arc::clone(&self.ctx), cancel.clone()));
        *running = Some(RunningLoop { cancel, handle });

        tracing::info!(
            poll_interval_ms = self.ctx.config.poll_interval_ms,
            max_concurrency = self.ctx.config.max_concurrency,
            max_retries = self.ctx.config.max_retries,
            "Worker started"
        );
        Ok(())
    }

    /// Signal the loop to exit and wait for in-flight jobs to finish.
    /// A no-op when the worker is already stopped.
    pub async fn stop(&self) {
        let running = self.running.lock().unwrap().take();
        if let Some(running) = running {
            running.cancel.cancel();
            let _ = running.handle.await;
            tracing::info!("Worker stopped");
        }
    }

    pub fn get_stats(&self) -> WorkerStats {
        WorkerStats {
            running: self.running.lock().unwrap().is_some(),
            active_jobs: self.ctx.active_jobs.load(Ordering::SeqCst),
            poll_interval_ms: self.ctx.config.poll_interval_ms,
            max_retries: self.ctx.config.max_retries,
            retry_delay_ms: self.ctx.config.retry_delay_ms,
        }
    }
}

async fn run_loop(ctx: Arc<WorkerCtx>, cancel: CancellationToken) {
    let mut interval =
        tokio::time::interval(Duration::from_millis(ctx.config.poll_interval_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut in_flight: JoinSet<()> = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                while in_flight.try_join_next().is_some() {}
                if let Err(e) = claim_tick(&ctx, &mut in_flight).await {
                    tracing::error!(error = %e, "Claim tick failed");
                }
            }
        }
    }

    // Quiescence: in-flight jobs run to completion before stop() returns.
    while in_flight.join_next().await.is_some() {}
}

/// One polling tick: claim eligible jobs up to the free concurrency budget
/// and spawn their pipelines.
async fn claim_tick(ctx: &Arc<WorkerCtx>, in_flight: &mut JoinSet<()>) -> Result<(), StoreError> {
    let budget = ctx
        .config
        .max_concurrency
        .saturating_sub(ctx.active_jobs.load(Ordering::SeqCst));
    if budget == 0 {
        return Ok(());
    }

    let candidates = ctx.store.claimable_jobs(Utc::now(), budget as i64).await?;
    for candidate in candidates {
        // Conditional claim: zero rows affected means another actor got
        // there first; skip without error.
        let Some(job) = ctx.store.claim_job(candidate.id, Utc::now()).await? else {
            continue;
        };

        ctx.active_jobs.fetch_add(1, Ordering::SeqCst);
        let ctx = Arc::clone(ctx);
        in_flight.spawn(async move {
            process_claimed(&ctx, job).await;
            ctx.active_jobs.fetch_sub(1, Ordering::SeqCst);
        });
    }

    Ok(())
}

async fn process_claimed(ctx: &Arc<WorkerCtx>, job: Job) {
    tracing::info!(
        job_id = %job.id,
        batch_id = %job.batch_id,
        job_type = %job.job_type,
        attempt = job.attempts,
        "Processing job"
    );

    // Cancellation is cooperative: checked here and again after the
    // pipeline returns. A canceled job produces no metric.
    if is_canceled(ctx, &job).await {
        tracing::info!(job_id = %job.id, "Job canceled before start, skipping");
        return;
    }

    let started_at = job.started_at.unwrap_or_else(Utc::now);
    let result = ctx.pipeline.process(&job).await;
    let ended_at = Utc::now();

    if is_canceled(ctx, &job).await {
        tracing::info!(job_id = %job.id, "Job canceled mid-flight, discarding result");
        return;
    }

    match result {
        Ok(output) => {
            match ctx.store.mark_success(job.id, ended_at).await {
                Ok(true) => {}
                // Lost the race to a cancel; leave the row alone.
                Ok(false) => return,
                Err(e) => {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to record success");
                    return;
                }
            }

            if let Err(e) = ctx
                .metrics
                .record_success(&job, started_at, ended_at, &output)
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to write success metric");
            }
            if let Err(e) = ctx
                .store
                .set_batch_status(&job.batch_id, BatchStatus::Review)
                .await
            {
                tracing::error!(job_id = %job.id, error = %e, "Failed to move batch to review");
            }

            tracing::info!(
                job_id = %job.id,
                image_count = output.image_count,
                extraction_count = output.extraction_count,
                tokens_used = output.tokens_used,
                "Job completed"
            );
        }
        Err(e) => {
            let message = e.to_string();
            tracing::warn!(job_id = %job.id, attempt = job.attempts, error = %message, "Attempt failed");

            if job.attempts < ctx.config.max_retries {
                let delay = backoff_delay(ctx.config.retry_delay_ms, job.attempts);
                let next_run_at = ended_at
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());

                match ctx.store.schedule_retry(job.id, next_run_at, &message).await {
                    Ok(true) => {
                        metrics::counter!("extraction_jobs_retried").increment(1);
                        tracing::info!(
                            job_id = %job.id,
                            delay_ms = delay.as_millis() as u64,
                            "Job re-queued with backoff"
                        );
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to schedule retry")
                    }
                }
            } else {
                match ctx.store.mark_failed(job.id, ended_at, &message).await {
                    Ok(true) => {}
                    Ok(false) => return,
                    Err(e) => {
                        tracing::error!(job_id = %job.id, error = %e, "Failed to record failure");
                        return;
                    }
                }

                let image_count = job
                    .payload
                    .image_keys
                    .as_ref()
                    .map(|k| k.len() as i64)
                    .unwrap_or(0);
                if let Err(e) = ctx
                    .metrics
                    .record_failure(&job, started_at, ended_at, &message, image_count)
                    .await
                {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to write failure metric");
                }
                if let Err(e) = ctx
                    .store
                    .set_batch_status(&job.batch_id, BatchStatus::Failed)
                    .await
                {
                    tracing::error!(job_id = %job.id, error = %e, "Failed to move batch to failed");
                }

                tracing::warn!(
                    job_id = %job.id,
                    attempts = job.attempts,
                    "Job failed after exhausting retries"
                );
            }
        }
    }
}

async fn is_canceled(ctx: &Arc<WorkerCtx>, job: &Job) -> bool {
    match ctx.store.get_job(job.id).await {
        Ok(Some(current)) => current.status == JobStatus::Canceled,
        Ok(None) => false,
        Err(e) => {
            tracing::error!(job_id = %job.id, error = %e, "Cancellation check failed");
            false
        }
    }
}

/// Exponential backoff seeded by `retry_delay_ms`: the Nth attempt waits
/// `retry_delay_ms * 2^(N-1)` before becoming claimable again.
fn backoff_delay(retry_delay_ms: u64, attempts: i32) -> Duration {
    let exp = attempts.saturating_sub(1).clamp(0, 20) as u32;
    Duration::from_millis(retry_delay_ms.saturating_mul(1u64 << exp))
}
