use thiserror::Error;

use crate::config::ConfigError;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("No embedding provider is configured for this store")]
    NotConfigured,

    #[error("Embedding dimension mismatch: index dim={expected}, new dim={actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Embedding provider error: {0}")]
    Provider(String),

    #[error(
        "Vector index is out of step with metadata: {index_len} vectors for {chunk_count} chunks"
    )]
    Consistency { index_len: usize, chunk_count: usize },

    #[error("A rebuild is already running for this store")]
    RebuildInProgress,

    #[error("Invalid vector index file: {0}")]
    IndexFormat(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Wrap a provider failure, keeping the whole context chain in the message
    #[inline]
    pub fn provider(err: &anyhow::Error) -> Self {
        Self::Provider(format!("{:#}", err))
    }
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod extract;
pub mod store;
