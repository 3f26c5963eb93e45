#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use crate::config::Config;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
const DEFAULT_RETRY_ATTEMPTS: u32 = 3;
const EXPONENTIAL_BACKOFF_BASE: u64 = 2;

/// Text-to-vector backend.
///
/// Implementations must be deterministic in dimensionality: callers rely on
/// a fixed dimension for schema creation and zero-vector fallback queries.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimension of this provider.
    fn dimension(&self) -> usize;
}

/// Embedding client for an OpenAI-compatible `/v1/embeddings` endpoint.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddings {
    client: reqwest::Client,
    base_url: Url,
    api_key: String,
    model: String,
    dimension: usize,
    batch_size: usize,
    retry_attempts: u32,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingDatum {
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbeddings {
    #[inline]
    pub fn new(config: &Config) -> Result<Self> {
        let base_url = config
            .model_base_url()
            .context("Failed to build model base URL from config")?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.model_api_key.clone(),
            model: config.model.embedding_model.clone(),
            dimension: config.model.embedding_dimension as usize,
            batch_size: config.model.embed_batch_size as usize,
            retry_attempts: DEFAULT_RETRY_ATTEMPTS,
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts;
        self
    }

    async fn request_embeddings(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/v1/embeddings")
            .context("Failed to build embeddings URL")?;

        let body = EmbeddingsRequest {
            model: &self.model,
            input: inputs,
        };

        let response_text = self
            .send_with_retry(|| {
                self.client
                    .post(url.clone())
                    .bearer_auth(&self.api_key)
                    .json(&body)
            })
            .await
            .context("Failed to request embeddings")?;

        let mut parsed: EmbeddingsResponse = serde_json::from_str(&response_text)
            .context("Failed to parse embeddings response")?;

        if parsed.data.len() != inputs.len() {
            anyhow::bail!(
                "Mismatch between request and response counts: {} vs {}",
                inputs.len(),
                parsed.data.len()
            );
        }

        // The API may reorder results; the index field is authoritative.
        parsed.data.sort_by_key(|d| d.index);

        for datum in &parsed.data {
            if datum.embedding.len() != self.dimension {
                anyhow::bail!(
                    "Embedding dimension mismatch: expected {}, got {}",
                    self.dimension,
                    datum.embedding.len()
                );
            }
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }

    /// Issue a request, retrying server and transport errors with
    /// exponential backoff. Client errors (4xx) fail immediately.
    async fn send_with_retry<F>(&self, request_fn: F) -> Result<String>
    where
        F: Fn() -> reqwest::RequestBuilder,
    {
        let mut last_error = None;

        for attempt in 1..=self.retry_attempts {
            debug!("Embedding request attempt {}/{}", attempt, self.retry_attempts);

            match request_fn().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        return response
                            .text()
                            .await
                            .context("Failed to read response body");
                    }
                    if status.is_client_error() {
                        let body = response.text().await.unwrap_or_default();
                        anyhow::bail!("Client error: HTTP {status}: {body}");
                    }
                    warn!(
                        "Server error (status {}), attempt {}/{}",
                        status, attempt, self.retry_attempts
                    );
                    last_error = Some(anyhow::anyhow!("Server error: HTTP {status}"));
                }
                Err(error) => {
                    warn!(
                        "Transport error: {}, attempt {}/{}",
                        error, attempt, self.retry_attempts
                    );
                    last_error = Some(anyhow::anyhow!("Request error: {error}"));
                }
            }

            if attempt < self.retry_attempts {
                let delay_ms = EXPONENTIAL_BACKOFF_BASE.pow(attempt - 1) * 1000;
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Request failed after retries")))
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddings {
    #[inline]
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let results = self.request_embeddings(&[text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("Empty embeddings response"))
    }

    #[inline]
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!("Generating embeddings for {} texts", texts.len());

        let mut results = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size.max(1)) {
            let batch_results = self
                .request_embeddings(batch)
                .await
                .with_context(|| format!("Failed to embed batch of {} texts", batch.len()))?;
            results.extend(batch_results);
        }

        Ok(results)
    }

    #[inline]
    fn dimension(&self) -> usize {
        self.dimension
    }
}
