use garde::Validate;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Vision-language model inference endpoint
    pub vlm_api_url: String,

    /// Bearer token for the inference API
    pub vlm_api_token: String,

    /// Model identifier sent with every inference request
    #[serde(default = "default_vlm_model")]
    pub vlm_model: String,

    /// Bucket holding uploaded batch images (S3-compatible)
    pub s3_bucket: String,
    pub s3_endpoint: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,

    /// Worker tunables, see [`WorkerConfig`]
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

/// Tunables consumed at worker construction.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct WorkerConfig {
    /// Concurrent in-flight inference calls and claimed jobs
    #[garde(range(min = 1))]
    pub max_concurrency: usize,

    /// Inference call starts per trailing 60 seconds
    #[garde(range(min = 1))]
    pub requests_per_minute: usize,

    /// Base delay before a failed job becomes claimable again
    #[garde(skip)]
    pub retry_delay_ms: u64,

    /// Attempts before a job is marked terminally failed
    #[garde(range(min = 0))]
    pub max_retries: i32,

    /// Claim loop cadence
    #[garde(range(min = 1))]
    pub poll_interval_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            requests_per_minute: default_requests_per_minute(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retries: default_max_retries(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_vlm_model() -> String {
    "qwen3-vl".to_string()
}

fn default_max_concurrency() -> usize {
    3
}

fn default_requests_per_minute() -> usize {
    30
}

fn default_retry_delay_ms() -> u64 {
    2000
}

fn default_max_retries() -> i32 {
    3
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl AppConfig {
    pub fn from_env() -> Result<Self, envy::Error> {
        dotenvy::dotenv().ok();
        envy::from_env()
    }

    pub fn worker(&self) -> WorkerConfig {
        WorkerConfig {
            max_concurrency: self.max_concurrency,
            requests_per_minute: self.requests_per_minute,
            retry_delay_ms: self.retry_delay_ms,
            max_retries: self.max_retries,
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}
