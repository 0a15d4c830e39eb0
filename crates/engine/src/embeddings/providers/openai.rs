//! Remote dense embeddings over an OpenAI-compatible `/embeddings` endpoint.
//!
//! # Retry Strategy
//! - Network errors, HTTP 429 and HTTP 5xx are transient and retried
//! - Any other non-success status fails immediately
//! - Backoff doubles from [`INITIAL_BACKOFF_MS`] between attempts
//!
//! Every request is bounded by the configured timeout; once retries are
//! exhausted the last error surfaces as [`AppError::Provider`].

use crate::embeddings::config::EmbeddingConfig;
use crate::embeddings::provider::EmbeddingProvider;
use async_trait::async_trait;
use meridian_core::{AppError, AppResult};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, instrument, warn};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";

/// Initial backoff duration in milliseconds
const INITIAL_BACKOFF_MS: u64 = 500;

/// Backoff exponent cap (500ms * 2^5 = 16s)
const MAX_BACKOFF_EXPONENT: u32 = 5;

/// OpenAI-compatible embedding provider.
#[derive(Debug, Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dimensions: usize,
    max_retries: u32,
    initial_backoff: Duration,
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

/// Outcome of a single failed request.
#[derive(Debug)]
enum RequestError {
    Transient(String),
    Permanent(String),
}

impl OpenAiProvider {
    /// Create a provider from configuration.
    ///
    /// # Errors
    /// * `AppError::Config` - the API key variable is unset
    /// * `AppError::Provider` - the HTTP client cannot be built
    pub fn new(config: &EmbeddingConfig) -> AppResult<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            AppError::Config(format!(
                "API key not found in environment variable: {}",
                config.api_key_env
            ))
        })?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| AppError::Provider(format!("Failed to create HTTP client: {}", e)))?;

        let base_url = config
            .endpoint
            .clone()
            .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            dimensions: config.dimensions,
            max_retries: config.max_retries,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    #[instrument(skip(self, texts), fields(batch_size = texts.len(), model = %self.model))]
    async fn embed_with_retries(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        let mut last_error = String::from("no attempt made");

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let exponent = (attempt - 1).min(MAX_BACKOFF_EXPONENT);
                let backoff = self.initial_backoff * (1u32 << exponent);
                warn!(
                    "Embedding request failed (attempt {}/{}), retrying in {}ms: {}",
                    attempt,
                    self.max_retries + 1,
                    backoff.as_millis(),
                    last_error
                );
                tokio::time::sleep(backoff).await;
            }

            match self.send_once(texts).await {
                Ok(embeddings) => return Ok(embeddings),
                Err(RequestError::Transient(msg)) => last_error = msg,
                Err(RequestError::Permanent(msg)) => return Err(AppError::Provider(msg)),
            }
        }

        Err(AppError::Provider(format!(
            "Embedding failed after {} attempts: {}",
            self.max_retries + 1,
            last_error
        )))
    }

    async fn send_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, RequestError> {
        let url = format!("{}/embeddings", self.base_url);
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
        };

        debug!("Sending embedding request to {}", url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RequestError::Transient(format!("Request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let msg = format!("Embedding API error ({}): {}", status, body);
            return Err(if is_transient(status) {
                RequestError::Transient(msg)
            } else {
                RequestError::Permanent(msg)
            });
        }

        let body = response
            .text()
            .await
            .map_err(|e| RequestError::Transient(format!("Failed to read response: {}", e)))?;

        parse_response(&body, texts.len(), self.dimensions).map_err(RequestError::Permanent)
    }
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// Parse a response body, restoring input order by `index`.
fn parse_response(body: &str, expected: usize, dimensions: usize) -> Result<Vec<Vec<f32>>, String> {
    let mut parsed: EmbeddingResponse = serde_json::from_str(body)
        .map_err(|e| format!("Failed to parse embedding response: {}", e))?;

    if parsed.data.len() != expected {
        return Err(format!(
            "Embedding response has {} vectors for {} inputs",
            parsed.data.len(),
            expected
        ));
    }

    parsed.data.sort_by_key(|d| d.index);

    parsed
        .data
        .into_iter()
        .map(|d| {
            if d.embedding.len() == dimensions {
                Ok(d.embedding)
            } else {
                Err(format!(
                    "Unexpected embedding dimensions: got {}, expected {}",
                    d.embedding.len(),
                    dimensions
                ))
            }
        })
        .collect()
}

#[async_trait]
impl EmbeddingProvider for OpenAiProvider {
    fn provider_name(&self) -> &str {
        "openai"
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> AppResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        self.embed_with_retries(texts).await
    }
}
