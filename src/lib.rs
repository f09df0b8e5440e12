use thiserror::Error;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(
        "Dimension mismatch for tenant '{tenant}': index holds {stored}-dimensional vectors, got {requested}"
    )]
    DimensionMismatch {
        tenant: String,
        stored: usize,
        requested: usize,
    },

    #[error("Storage corruption for tenant '{tenant}': {reason}")]
    StorageCorruption { tenant: String, reason: String },

    #[error("Embedding backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod embeddings;
pub mod retrieval;
pub mod source;
pub mod store;
