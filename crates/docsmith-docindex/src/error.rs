use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad glob pattern '{pattern}': {message}")]
    Glob { pattern: String, message: String },

    #[error("Store error: {0}")]
    Store(#[from] docsmith_store::StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
