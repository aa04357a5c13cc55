
use tracing::debug;

use crate::config::{ChunkingConfig, ConfigError};

/// Deterministic fixed-size sliding-window text segmentation.
///
/// Windows are measured in characters, not bytes, so multi-byte text is never
/// cut inside a code point. Each window starts `max_chars - overlap`
/// characters after the previous one; the last window may be shorter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    max_chars: usize,
    overlap: usize,
}

impl Default for TextSplitter {
    #[inline]
    fn default() -> Self {
        let config = ChunkingConfig::default();
        Self {
            max_chars: config.max_chars,
            overlap: config.overlap,
        }
    }
}

impl TextSplitter {
    /// Create a splitter, rejecting `overlap >= max_chars` or `max_chars == 0`
    #[inline]
    pub fn new(max_chars: usize, overlap: usize) -> Result<Self, ConfigError> {
        ChunkingConfig { max_chars, overlap }.validate()?;
        Ok(Self { max_chars, overlap })
    }

    #[inline]
    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ConfigError> {
        Self::new(config.max_chars, config.overlap)
    }

    #[inline]
    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    #[inline]
    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into overlapping windows.
    ///
    /// Empty or whitespace-only input yields no chunks.
    #[inline]
    pub fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let step = self.max_chars - self.overlap;
        let mut chunks = Vec::with_capacity(chars.len().div_ceil(step));

        let mut start = 0;
        loop {
            let end = (start + self.max_chars).min(chars.len());
            chunks.push(chars[start..end].iter().collect::<String>());
            if end >= chars.len() {
                break;
            }
            start += step;
        }

        debug!(
            "Split {} chars into {} chunks (max_chars={}, overlap={})",
            chars.len(),
            chunks.len(),
            self.max_chars,
            self.overlap
        );
        chunks
    }
}
