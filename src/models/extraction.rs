use serde::{Deserialize, Serialize};

/// Structured product fields extracted from one image by the
/// vision-language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductExtraction {
    pub product_name: String,
    pub brand: Option<String>,
    pub category: Option<String>,
    pub size: Option<String>,
    pub ingredients: Option<String>,
    pub barcode: Option<String>,
}

/// Aggregate result of running a job's pipeline, reported back to the
/// worker for metric recording.
#[derive(Debug, Clone, Default)]
pub struct PipelineOutput {
    pub image_count: i64,
    pub extraction_count: i64,
    pub model_used: Option<String>,
    pub tokens_used: i64,
}
