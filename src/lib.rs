use thiserror::Error;

pub type Result<T, E = RagError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum RagError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("No documents found in {0}")]
    NoDocumentsFound(String),

    #[error("Index corrupt: {0}")]
    IndexCorrupt(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<config::ConfigError> for RagError {
    #[inline]
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

pub mod answering;
pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod indexer;
pub mod loader;
pub mod memory;
pub mod ollama;
pub mod query;
