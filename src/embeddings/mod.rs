// Embeddings module
// Provider boundary, text chunking and vector normalization

pub mod chunking;
pub mod hashing;
mod http;
pub mod ollama;
pub mod openai;

#[cfg(test)]
mod tests;

use std::fmt::Debug;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::StoreError;
use crate::config::{Config, ProviderKind};

pub use chunking::TextSplitter;
pub use hashing::HashingEmbedder;
pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

/// A batched text-to-vector capability supplied by a configured provider.
///
/// Implementations may block on network I/O and must return one vector per
/// input text, all of the same provider-defined width. Vectors do not need
/// to be normalized; the store does that before indexing.
pub trait Embedder: Send + Sync + Debug {
    /// Name of the model producing the vectors
    fn model_name(&self) -> &str;

    /// Embed a batch of texts
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Build the embedder selected by `config.provider`
#[inline]
pub fn build_embedder(config: &Config) -> Result<Arc<dyn Embedder>> {
    let embedder: Arc<dyn Embedder> = match config.provider {
        ProviderKind::Ollama => Arc::new(
            OllamaClient::new(&config.ollama).context("Failed to initialize Ollama client")?,
        ),
        ProviderKind::OpenAi => Arc::new(
            OpenAiClient::new(&config.openai).context("Failed to initialize OpenAI client")?,
        ),
        ProviderKind::Hashing => Arc::new(HashingEmbedder::new(config.hashing.dimension)?),
    };
    debug!("Using embedding model {}", embedder.model_name());
    Ok(embedder)
}

/// Scale a vector to unit L2 length in place. Zero vectors are left alone.
#[inline]
pub fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > f32::EPSILON {
        for value in vector.iter_mut() {
            *value /= norm;
        }
    }
}

/// Embed `texts`, check the provider's answer and normalize every vector.
///
/// Returns the vectors together with their shared width.
pub(crate) fn embed_normalized(
    embedder: &dyn Embedder,
    texts: &[String],
) -> Result<(Vec<Vec<f32>>, usize), StoreError> {
    let mut vectors = embedder
        .embed(texts)
        .map_err(|e| StoreError::provider(&e))?;

    if vectors.len() != texts.len() {
        return Err(StoreError::Provider(format!(
            "Mismatch between request and response counts: {} vs {}",
            texts.len(),
            vectors.len()
        )));
    }

    let dim = vectors.first().map_or(0, Vec::len);
    if dim == 0 && !vectors.is_empty() {
        return Err(StoreError::Provider(
            "Provider returned an empty embedding".to_string(),
        ));
    }

    for vector in &mut vectors {
        if vector.len() != dim {
            return Err(StoreError::DimensionMismatch {
                expected: dim,
                actual: vector.len(),
            });
        }
        normalize(vector);
    }

    Ok((vectors, dim))
}
