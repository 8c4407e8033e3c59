use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Proposal {id} is frozen: attached to changeset batch {batch_id}")]
    Frozen { id: i64, batch_id: String },

    #[error("Changeset batch {batch_id} is no longer a draft")]
    BatchNotDraft { batch_id: String },

    #[error("Watermark for stream {stream_id} would move backwards ({from} -> {to})")]
    WatermarkRegression {
        stream_id: String,
        from: String,
        to: String,
    },

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Short error code string surfaced on the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Database(_) => "DATABASE_ERROR",
            StoreError::Serialization(_) => "SERIALIZATION_ERROR",
            StoreError::NotFound { .. } => "NOT_FOUND",
            StoreError::Frozen { .. } => "E_FROZEN",
            StoreError::BatchNotDraft { .. } => "E_BATCH_NOT_DRAFT",
            StoreError::WatermarkRegression { .. } => "E_WATERMARK_REGRESSION",
            StoreError::Corrupt(_) => "CORRUPT_ROW",
            StoreError::Unavailable(_) => "STORE_UNAVAILABLE",
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
