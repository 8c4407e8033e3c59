use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("Adapter config error: {0}")]
    Config(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Store error: {0}")]
    Store(#[from] docsmith_store::StoreError),

    #[error("Stream not registered: {0}")]
    NotRegistered(String),

    #[error("operation cancelled")]
    Cancelled,
}

impl StreamError {
    /// Short error code string surfaced on the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::Config(_) => "E_CONFIG",
            StreamError::Http(_) => "HTTP_ERROR",
            StreamError::Api { .. } => "API_ERROR",
            StreamError::Csv(_) => "CSV_ERROR",
            StreamError::Io(_) => "IO_ERROR",
            StreamError::Parse(_) => "PARSE_ERROR",
            StreamError::Store(e) => e.code(),
            StreamError::NotRegistered(_) => "NOT_REGISTERED",
            StreamError::Cancelled => "CANCELLED",
        }
    }
}

pub type Result<T> = std::result::Result<T, StreamError>;
