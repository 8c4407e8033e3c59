use thiserror::Error;

#[derive(Debug, Error)]
pub enum RulesetError {
    #[error("LLM gateway error: {0}")]
    Gateway(#[from] docsmith_llm::GatewayError),

    #[error("Bad review response: {0}")]
    BadResponse(String),
}

impl RulesetError {
    pub fn code(&self) -> &'static str {
        match self {
            RulesetError::Gateway(e) => e.code(),
            RulesetError::BadResponse(_) => "E_RULESET_RESPONSE",
        }
    }
}

pub type Result<T> = std::result::Result<T, RulesetError>;
