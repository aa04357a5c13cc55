#[cfg(test)]
mod tests;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use super::Embedder;
use super::http::RetryPolicy;
use crate::config::OpenAiConfig;

/// Client for OpenAI-compatible `/embeddings` endpoints
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    endpoint: Url,
    api_key: String,
    model: String,
    batch_size: u32,
    agent: ureq::Agent,
    retry: RetryPolicy,
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &OpenAiConfig) -> Result<Self> {
        let base_url = config
            .endpoint_url()
            .context("Failed to parse OpenAI base URL")?;
        let endpoint = base_url
            .join("embeddings")
            .context("Failed to build embeddings URL")?;

        let mut builder = ureq::Agent::config_builder()
            .timeout_global(Some(Duration::from_secs(config.timeout_secs.max(1))));

        if !config.proxy_url.trim().is_empty() {
            let proxy = ureq::Proxy::new(config.proxy_url.trim())
                .with_context(|| format!("Invalid proxy URL: {}", config.proxy_url))?;
            debug!("Routing embedding requests through proxy {}", config.proxy_url);
            builder = builder.proxy(Some(proxy));
        }

        if config.disable_ssl {
            warn!("TLS certificate verification is disabled for {}", endpoint);
            builder = builder.tls_config(
                ureq::tls::TlsConfig::builder()
                    .disable_verification(true)
                    .build(),
            );
        }

        Ok(Self {
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
            agent: builder.build().into(),
            retry: RetryPolicy::default(),
        })
    }

    #[inline]
    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry.attempts = attempts.max(1);
        self
    }

    #[inline]
    pub fn with_backoff_unit(mut self, unit: Duration) -> Self {
        self.retry.backoff_unit = unit;
        self
    }

    /// Embed a single probe text to verify credentials and model
    #[inline]
    pub fn health_check(&self) -> Result<()> {
        let vectors = self
            .embed_single_batch(&["ping".to_string()])
            .context("Embedding endpoint health check failed")?;
        let dim = vectors.first().map_or(0, Vec::len);
        info!(
            "Health check passed for {} with model {} ({} dimensions)",
            self.endpoint, self.model, dim
        );
        Ok(())
    }

    fn embed_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingsRequest {
            model: &self.model,
            input: texts,
        };
        let request_json =
            serde_json::to_string(&request).context("Failed to serialize embedding request")?;
        let authorization = format!("Bearer {}", self.api_key);

        let response_text = self
            .retry
            .run(self.endpoint.as_str(), || {
                let mut call = self
                    .agent
                    .post(self.endpoint.as_str())
                    .header("Content-Type", "application/json");
                if !self.api_key.is_empty() {
                    call = call.header("Authorization", &authorization);
                }
                call
                    .send(&request_json)
                    .and_then(|mut resp| resp.body_mut().read_to_string())
            })
            .context("Failed to generate embeddings")?;

        let mut response: EmbeddingsResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.data.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            ));
        }

        // Results may arrive out of order
        response.data.sort_by_key(|item| item.index);
        Ok(response
            .data
            .into_iter()
            .map(|item| item.embedding)
            .collect())
    }
}

impl Embedder for OpenAiClient {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        debug!(
            "Requesting {} embeddings from {} in batches of {}",
            texts.len(),
            self.endpoint,
            self.batch_size
        );

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size as usize) {
            let batch = self
                .embed_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            results.extend(batch);
        }
        Ok(results)
    }
}
