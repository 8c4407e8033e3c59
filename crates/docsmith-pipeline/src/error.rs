use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Store error: {0}")]
    Store(#[from] docsmith_store::StoreError),

    #[error("LLM gateway error: {0}")]
    Gateway(#[from] docsmith_llm::GatewayError),

    #[error("Vector error: {0}")]
    Vector(#[from] docsmith_vector::VectorError),

    #[error("Ruleset error: {0}")]
    Ruleset(#[from] docsmith_ruleset::RulesetError),

    #[error("Doc index error: {0}")]
    Index(#[from] docsmith_docindex::IndexError),

    #[error("Step '{step}' failed: {message}")]
    Step { step: String, message: String },

    #[error("operation cancelled")]
    Cancelled,
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Store(e) => e.code(),
            PipelineError::Gateway(e) => e.code(),
            PipelineError::Vector(_) => "VECTOR_ERROR",
            PipelineError::Ruleset(e) => e.code(),
            PipelineError::Index(_) => "INDEX_ERROR",
            PipelineError::Step { .. } => "STEP_FAILED",
            PipelineError::Cancelled => "CANCELLED",
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
