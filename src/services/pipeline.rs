use async_trait::async_trait;
use std::sync::Arc;

use crate::db::store::{JobStore, StoreError};
use crate::models::extraction::PipelineOutput;
use crate::models::job::{Job, JobType};
use crate::services::pool::ConnectionPool;
use crate::services::storage::{ImageStorage, StorageError};
use crate::services::vlm::{preset_prompt, VlmClient, VlmError};

/// Job-type-specific processing. The worker treats any error as a
/// transient attempt failure; deciding retry vs terminal is its job, not
/// the pipeline's.
#[async_trait]
pub trait BatchPipeline: Send + Sync {
    async fn process(&self, job: &Job) -> Result<PipelineOutput, PipelineError>;
}

/// Production pipeline: pulls batch images from object storage and runs
/// each through the vision-language model, every call gated by the
/// connection pool.
pub struct ExtractionPipeline {
    store: Arc<dyn JobStore>,
    storage: Arc<ImageStorage>,
    vlm: Arc<VlmClient>,
    pool: ConnectionPool,
}

impl ExtractionPipeline {
    pub fn new(
        store: Arc<dyn JobStore>,
        storage: Arc<ImageStorage>,
        vlm: Arc<VlmClient>,
        pool: ConnectionPool,
    ) -> Self {
        Self {
            store,
            storage,
            vlm,
            pool,
        }
    }

    /// `process_batch` covers every image in the batch; `process_redo`
    /// re-runs exactly the keys named in the payload.
    async fn resolve_image_keys(&self, job: &Job) -> Result<Vec<String>, PipelineError> {
        match job.job_type {
            JobType::ProcessBatch => Ok(self.store.batch_image_keys(&job.batch_id).await?),
            JobType::ProcessRedo => match &job.payload.image_keys {
                Some(keys) if !keys.is_empty() => Ok(keys.clone()),
                _ => Err(PipelineError::MissingImageKeys),
            },
        }
    }
}

#[async_trait]
impl BatchPipeline for ExtractionPipeline {
    async fn process(&self, job: &Job) -> Result<PipelineOutput, PipelineError> {
        let keys = self.resolve_image_keys(job).await?;
        let prompt = preset_prompt(job.payload.prompt_preset.as_deref());

        let mut output = PipelineOutput {
            image_count: keys.len() as i64,
            model_used: Some(self.vlm.model().to_string()),
            ..Default::default()
        };

        for key in &keys {
            tracing::debug!(job_id = %job.id, image_key = %key, "Downloading batch image");
            let image_bytes = self.storage.download(key).await?;

            let (extraction, tokens) = self
                .pool
                .execute(|| self.vlm.extract_product_fields(&image_bytes, prompt))
                .await?;

            tracing::debug!(
                job_id = %job.id,
                image_key = %key,
                product = %extraction.product_name,
                "Extraction complete"
            );

            output.extraction_count += 1;
            output.tokens_used += tokens.unwrap_or(0);
        }

        Ok(output)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("redo job has no image keys in its payload")]
    MissingImageKeys,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Vlm(#[from] VlmError),
}
