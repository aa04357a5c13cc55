
use std::collections::HashMap;

use anyhow::{Result, bail};

use super::Embedder;

pub const DEFAULT_HASHING_DIMENSION: usize = 256;

/// Offline embedder that feature-hashes lowercase word tokens into a fixed
/// number of buckets, weighting each term by `1 + ln(tf)`.
///
/// Output is deterministic across processes and platforms, so indexes built
/// with it can be reloaded and searched without any network provider.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
    model: String,
}

impl HashingEmbedder {
    #[inline]
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            bail!("Hashing embedder dimension must be greater than 0");
        }
        Ok(Self {
            dimension,
            model: format!("hashing-{}", dimension),
        })
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut term_counts: HashMap<String, u32> = HashMap::new();
        for token in tokenize(text) {
            *term_counts.entry(token).or_default() += 1;
        }

        let mut vector = vec![0.0_f32; self.dimension];
        for (term, count) in term_counts {
            let hash = crc32fast::hash(term.as_bytes());
            let bucket = hash as usize % self.dimension;
            let sign = if hash & 0x8000_0000 == 0 { 1.0 } else { -1.0 };
            let weight = 1.0 + (count as f32).ln();
            vector[bucket] += sign * weight;
        }
        vector
    }
}

impl Embedder for HashingEmbedder {
    #[inline]
    fn model_name(&self) -> &str {
        &self.model
    }

    #[inline]
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}

/// Split text into lowercase runs of ASCII letters, digits and underscores
#[inline]
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .filter(|token| !token.is_empty())
        .map(str::to_ascii_lowercase)
}
