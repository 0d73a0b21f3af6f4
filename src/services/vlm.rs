use base64::Engine;
use reqwest::Client;
use serde::Deserialize;

use crate::models::extraction::ProductExtraction;

/// Instruction presets for the extraction prompt. `default` asks for the
/// full product field set; `minimal` trims the request for faster models.
pub fn preset_prompt(preset: Option<&str>) -> &'static str {
    match preset {
        Some("minimal") => concat!(
            "Extract the following fields from this product image as JSON: ",
            "product_name, brand, barcode. ",
            "Use null for fields that are not visible. ",
            "Return ONLY valid JSON with these exact field names."
        ),
        _ => concat!(
            "You are an AI assistant specialized in extracting structured data ",
            "from product images. Carefully analyze all visible text, labels and ",
            "visual elements, then extract the following fields as JSON: ",
            "product_name, brand, category, size, ingredients, barcode. ",
            "If a value is not visible or cannot be determined, use null. ",
            "Do not make up or infer information that is not visible. ",
            "Return ONLY valid JSON with these exact field names, no explanations ",
            "or markdown formatting."
        ),
    }
}

/// Client for the remote vision-language model inference API.
pub struct VlmClient {
    http: Client,
    api_url: String,
    api_token: String,
    model: String,
}

#[derive(Deserialize)]
struct InferenceResponse {
    result: InferenceResult,
    #[serde(default)]
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct InferenceResult {
    response: String,
}

#[derive(Deserialize)]
struct TokenUsage {
    total_tokens: i64,
}

impl VlmClient {
    pub fn new(api_url: &str, api_token: &str, model: &str) -> Self {
        Self {
            http: Client::new(),
            api_url: api_url.to_string(),
            api_token: api_token.to_string(),
            model: model.to_string(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Send one product image to the model and parse the structured fields.
    /// Returns the extraction and the token count the provider reported.
    pub async fn extract_product_fields(
        &self,
        image_bytes: &[u8],
        prompt: &str,
    ) -> Result<(ProductExtraction, Option<i64>), VlmError> {
        let request_body = serde_json::json!({
            "model": self.model,
            "image": base64::engine::general_purpose::STANDARD.encode(image_bytes),
            "prompt": prompt,
            "max_tokens": 1024
        });

        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.api_token)
            .json(&request_body)
            .send()
            .await
            .map_err(VlmError::Http)?
            .error_for_status()
            .map_err(VlmError::Http)?;

        let inference: InferenceResponse = response.json().await.map_err(VlmError::Http)?;
        let extraction = serde_json::from_str(&inference.result.response).map_err(VlmError::Parse)?;
        let tokens = inference.usage.map(|u| u.total_tokens);

        Ok((extraction, tokens))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VlmError {
    #[error("inference request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("failed to parse model response as product fields: {0}")]
    Parse(#[from] serde_json::Error),
}
