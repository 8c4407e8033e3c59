use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CoreError {
    /// Short error code string surfaced on the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            CoreError::Config(_) => "E_CONFIG",
            CoreError::Serialization(_) => "SERIALIZATION_ERROR",
            CoreError::Io(_) => "IO_ERROR",
            CoreError::Http(_) => "HTTP_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
