//! Single entry point for all language-model calls.
//!
//! Every component that needs a model goes through [`gateway::LlmGateway`]:
//! it maps tiers to concrete models, canonicalises and hashes the prompt,
//! answers from the response cache when possible, retries transient provider
//! failures with exponential backoff, and validates JSON responses against
//! an expected shape before anyone downstream sees them.

pub mod anthropic;
pub mod error;
pub mod gateway;
pub mod provider;
pub mod schema;

pub use error::{GatewayError, Result};
pub use gateway::{LlmCall, LlmGateway, LlmOutput, LlmResult, TierMap};
pub use provider::{ChatRequest, ChatResponse, LlmProvider, Message, ModelTier, ProviderError, Role};
