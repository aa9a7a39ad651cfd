//! OpenAI-compatible embeddings client
//!
//! Posts `{model, input}` to `{endpoint}/embeddings` with:
//! - Bearer authentication from the environment
//! - Batch requests, reordered by response index
//! - Rate limit handling with exponential backoff

use std::time::Duration;

use reqwest::Client as HttpClient;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};

/// Maximum number of attempts for rate-limited requests
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Base delay for exponential backoff
const BACKOFF_BASE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: EmbeddingInput<'a>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
enum EmbeddingInput<'a> {
    Single(&'a str),
    Batch(&'a [String]),
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// HTTP embeddings client
#[derive(Clone)]
pub struct HttpEmbedder {
    http_client: HttpClient,
    endpoint: String,
    model: String,
    api_key: Option<String>,
    backoff_base: Duration,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("endpoint", &self.endpoint)
            .field("model", &self.model)
            .field("api_key", &self.api_key.is_some())
            .finish()
    }
}

impl HttpEmbedder {
    /// Create a client for `endpoint` (the API base URL)
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http_client = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(Error::NetworkError)?;

        Ok(Self {
            http_client,
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            backoff_base: BACKOFF_BASE,
        })
    }

    /// Create a client from configuration, reading the API key from the environment
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config
            .resolved_api_key()
            .map_err(|e| Error::ConfigError(e.to_string()))?;

        Self::new(&config.endpoint, &config.model, api_key, config.timeout())
    }

    /// Override the base delay between rate-limited attempts
    pub fn with_backoff_base(mut self, base: Duration) -> Self {
        self.backoff_base = base;
        self
    }

    /// Model identifier sent with every request
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Embed a single text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: EmbeddingInput::Single(text),
        };

        self.execute(&request)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| Error::EmbeddingFailed("Empty embedding response".to_string()))
    }

    /// Embed several texts in one request, preserving input order
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let request = EmbeddingRequest {
            model: &self.model,
            input: EmbeddingInput::Batch(texts),
        };

        let vectors = self.execute(&request).await?;
        if vectors.len() != texts.len() {
            return Err(Error::EmbeddingFailed(format!(
                "Expected {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }

    /// Send a request, retrying on rate limits
    async fn execute(&self, request: &EmbeddingRequest<'_>) -> Result<Vec<Vec<f32>>> {
        let mut attempts = 0;

        loop {
            attempts += 1;

            match self.send_request(request).await {
                Err(Error::RateLimited(_)) if attempts < MAX_RETRY_ATTEMPTS => {
                    let backoff = self.backoff_base * 2u32.pow(attempts - 1);
                    warn!(
                        attempt = attempts,
                        wait_ms = backoff.as_millis() as u64,
                        "Rate limited, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
                Err(Error::RateLimited(_)) => return Err(Error::RateLimited(attempts)),
                other => return other,
            }
        }
    }

    async fn send_request(&self, request: &EmbeddingRequest<'_>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.endpoint);

        debug!(model = %request.model, "Sending embedding request");

        let mut builder = self.http_client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(Error::NetworkError)?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match status.as_u16() {
                429 => Error::RateLimited(1),
                401 => Error::EmbeddingFailed(
                    "Unauthorized: set SYLLABUS_API_KEY or OPENAI_API_KEY".to_string(),
                ),
                _ => Error::EmbeddingFailed(format!("HTTP error {}: {}", status, body)),
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::EmbeddingFailed(format!("Failed to parse response: {}", e)))?;

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}
