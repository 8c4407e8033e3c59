use thiserror::Error;

use crate::provider::ProviderError;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("LLM retries exhausted after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: String },

    #[error("Permanent provider error: {0}")]
    Permanent(#[from] ProviderError),

    #[error("Response schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Store error: {0}")]
    Store(#[from] docsmith_store::StoreError),

    #[error("operation cancelled")]
    Cancelled,
}

impl GatewayError {
    /// Short error code string surfaced on the HTTP error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Exhausted { .. } => "E_LLM_EXHAUSTED",
            GatewayError::Permanent(_) => "E_LLM_PERMANENT",
            GatewayError::SchemaMismatch(_) => "E_SCHEMA_MISMATCH",
            GatewayError::Store(e) => e.code(),
            GatewayError::Cancelled => "CANCELLED",
        }
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
