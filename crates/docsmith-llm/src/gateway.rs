//! The gateway: tiering, caching, retries and response validation.

use std::sync::Arc;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use docsmith_core::config::{LlmConfig, TierConfig};
use docsmith_store::types::{CachePurpose, LlmCacheEntry};
use docsmith_store::Store;

use crate::error::{GatewayError, Result};
use crate::provider::{ChatRequest, LlmProvider, Message, ModelTier, ProviderError};
use crate::schema::{extract_json, schema_hash, validate};

const BASE_DELAY: Duration = Duration::from_secs(2);
const MAX_ATTEMPTS: u32 = 3;

/// One gateway call. `response_schema` switches the output to validated JSON.
#[derive(Debug, Clone)]
pub struct LlmCall {
    pub purpose: CachePurpose,
    pub tier: ModelTier,
    pub system: String,
    pub user: String,
    pub history: Vec<Message>,
    pub response_schema: Option<serde_json::Value>,
    /// Recorded on the cache entry so "all calls for a message" queries work.
    pub message_id: Option<i64>,
}

#[derive(Debug, Clone)]
pub enum LlmOutput {
    Json(serde_json::Value),
    Text(String),
}

impl LlmOutput {
    pub fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            LlmOutput::Json(v) => Some(v),
            LlmOutput::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            LlmOutput::Text(s) => Some(s),
            LlmOutput::Json(_) => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LlmResult {
    pub output: LlmOutput,
    pub tokens_used: u32,
    pub cache_hit: bool,
}

/// Per-tier model settings resolved from configuration.
#[derive(Debug, Clone)]
pub struct TierMap {
    fast: TierConfig,
    strong: TierConfig,
    strong_alt: TierConfig,
}

impl TierMap {
    pub fn from_config(cfg: &LlmConfig) -> Self {
        Self {
            fast: cfg.fast.clone(),
            strong: cfg.strong.clone(),
            strong_alt: cfg.strong_alt.clone(),
        }
    }

    fn get(&self, tier: ModelTier) -> &TierConfig {
        match tier {
            ModelTier::Fast => &self.fast,
            ModelTier::Strong => &self.strong,
            ModelTier::StrongAlt => &self.strong_alt,
        }
    }
}

/// Single call site for all model interactions. Safe for concurrent use —
/// calls are independent and the cache upserts by hash.
pub struct LlmGateway {
    provider: Arc<dyn LlmProvider>,
    store: Arc<Store>,
    tiers: TierMap,
    request_timeout: Duration,
}

impl LlmGateway {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        store: Arc<Store>,
        tiers: TierMap,
        request_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            tiers,
            request_timeout,
        }
    }

    /// The concrete model id a tier resolves to.
    pub fn model_name(&self, tier: ModelTier) -> &str {
        &self.tiers.get(tier).model
    }

    /// Execute a call: cache lookup, provider round-trips with backoff,
    /// JSON validation, cache store.
    ///
    /// Cancellation aborts the in-flight provider call and never writes the
    /// cache, so an aborted batch cannot poison later runs.
    pub async fn call(
        &self,
        call: &LlmCall,
        cancel: Option<&CancellationToken>,
    ) -> Result<LlmResult> {
        let tier_cfg = self.tiers.get(call.tier);
        let hash = self.request_hash(&tier_cfg.model, call);

        if let Some(entry) = self.store.cache_get(&hash)? {
            match self.parse_output(call, &entry.response) {
                Ok(output) => {
                    debug!(%hash, purpose = %call.purpose, "llm cache hit");
                    return Ok(LlmResult {
                        output,
                        tokens_used: entry.tokens_used,
                        cache_hit: true,
                    });
                }
                Err(ParseFailure::Malformed(e)) | Err(ParseFailure::SchemaMismatch(e)) => {
                    // A cached entry that no longer parses is replaced below.
                    warn!(%hash, error = %e, "discarding unparsable cache entry");
                }
            }
        }

        let req = ChatRequest {
            model: tier_cfg.model.clone(),
            system: call.system.clone(),
            messages: self.build_messages(call),
            max_tokens: tier_cfg.max_tokens,
            temperature: tier_cfg.temperature,
        };

        let mut last_err = String::new();
        for attempt in 0..MAX_ATTEMPTS {
            if let Some(token) = cancel {
                if token.is_cancelled() {
                    return Err(GatewayError::Cancelled);
                }
            }

            let outcome = self.send_once(&req, cancel).await;
            match outcome {
                Ok(resp) => {
                    match self.parse_output(call, &resp.content) {
                        Ok(output) => {
                            let tokens_used = resp.tokens_in + resp.tokens_out;
                            self.store.cache_put(&LlmCacheEntry {
                                hash: hash.clone(),
                                purpose: call.purpose,
                                prompt: self.canonical_prompt(call),
                                response: resp.content,
                                model: tier_cfg.model.clone(),
                                tokens_used,
                                timestamp: chrono::Utc::now(),
                                message_id: call.message_id,
                            })?;
                            if attempt > 0 {
                                info!(attempt, purpose = %call.purpose, "llm call succeeded after retry");
                            }
                            return Ok(LlmResult {
                                output,
                                tokens_used,
                                cache_hit: false,
                            });
                        }
                        // Schema mismatch on well-formed JSON is permanent;
                        // malformed output is transient and retried.
                        Err(ParseFailure::SchemaMismatch(e)) => {
                            return Err(GatewayError::SchemaMismatch(e));
                        }
                        Err(ParseFailure::Malformed(e)) => {
                            warn!(attempt, error = %e, "malformed llm response, retrying");
                            last_err = e;
                        }
                    }
                }
                Err(e) if e.is_transient() => {
                    warn!(attempt, error = %e, provider = %self.provider.name(), "transient llm failure");
                    last_err = e.to_string();
                }
                Err(ProviderError::Cancelled) => return Err(GatewayError::Cancelled),
                Err(e) => return Err(GatewayError::Permanent(e)),
            }

            if attempt + 1 < MAX_ATTEMPTS {
                // b·2^k with the transient ×2 multiplier.
                let delay = BASE_DELAY * 2u32.pow(attempt) * 2;
                tokio::time::sleep(delay).await;
            }
        }

        Err(GatewayError::Exhausted {
            attempts: MAX_ATTEMPTS,
            last: last_err,
        })
    }

    async fn send_once(
        &self,
        req: &ChatRequest,
        cancel: Option<&CancellationToken>,
    ) -> std::result::Result<crate::provider::ChatResponse, ProviderError> {
        let fut = tokio::time::timeout(self.request_timeout, self.provider.send(req));
        match cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => Err(ProviderError::Cancelled),
                    res = fut => flatten_timeout(res),
                }
            }
            None => flatten_timeout(fut.await),
        }
    }

    fn build_messages(&self, call: &LlmCall) -> Vec<Message> {
        let mut messages = call.history.clone();
        messages.push(Message {
            role: crate::provider::Role::User,
            content: call.user.clone(),
        });
        messages
    }

    /// Canonical prompt bytes: `system ‖ "\n" ‖ user ‖ json(history) ‖ schema_hash`.
    fn canonical_prompt(&self, call: &LlmCall) -> String {
        let history = serde_json::to_string(&call.history).unwrap_or_else(|_| "[]".to_string());
        let schema = call
            .response_schema
            .as_ref()
            .map(schema_hash)
            .unwrap_or_default();
        format!("{}\n{}{}{}", call.system, call.user, history, schema)
    }

    fn request_hash(&self, model: &str, call: &LlmCall) -> String {
        let mut hasher = Sha256::new();
        hasher.update(model.as_bytes());
        hasher.update(call.purpose.to_string().as_bytes());
        hasher.update(self.canonical_prompt(call).as_bytes());
        hex::encode(hasher.finalize())
    }

    fn parse_output(
        &self,
        call: &LlmCall,
        content: &str,
    ) -> std::result::Result<LlmOutput, ParseFailure> {
        match &call.response_schema {
            None => Ok(LlmOutput::Text(content.to_string())),
            Some(schema) => {
                let value = extract_json(content).map_err(ParseFailure::Malformed)?;
                validate(schema, &value).map_err(ParseFailure::SchemaMismatch)?;
                Ok(LlmOutput::Json(value))
            }
        }
    }
}

enum ParseFailure {
    /// Not JSON at all — transient, the model may do better next attempt.
    Malformed(String),
    /// Well-formed JSON with the wrong shape — permanent.
    SchemaMismatch(String),
}

fn flatten_timeout<T>(
    res: std::result::Result<std::result::Result<T, ProviderError>, tokio::time::error::Elapsed>,
) -> std::result::Result<T, ProviderError> {
    match res {
        Ok(inner) => inner,
        Err(_) => Err(ProviderError::Unavailable("request deadline exceeded".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{ChatResponse, Role};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockProvider {
        responses: Mutex<VecDeque<std::result::Result<ChatResponse, ProviderError>>>,
        calls: AtomicU32,
    }

    impl MockProvider {
        fn new(responses: Vec<std::result::Result<ChatResponse, ProviderError>>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
                calls: AtomicU32::new(0),
            }
        }

        fn call_count(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmProvider for MockProvider {
        fn name(&self) -> &str {
            "mock"
        }

        async fn send(&self, _req: &ChatRequest) -> std::result::Result<ChatResponse, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ProviderError::Unavailable("mock drained".into())))
        }
    }

    fn ok_response(content: &str) -> std::result::Result<ChatResponse, ProviderError> {
        Ok(ChatResponse {
            content: content.to_string(),
            model: "mock-model".to_string(),
            tokens_in: 100,
            tokens_out: 50,
            stop_reason: "end_turn".to_string(),
        })
    }

    fn gateway(provider: Arc<MockProvider>) -> (LlmGateway, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let tier = TierConfig {
            model: "mock-model".to_string(),
            max_tokens: 1024,
            temperature: 0.2,
        };
        let tiers = TierMap {
            fast: tier.clone(),
            strong: tier.clone(),
            strong_alt: tier,
        };
        (
            LlmGateway::new(provider, store.clone(), tiers, Duration::from_secs(60)),
            store,
        )
    }

    fn text_call(user: &str) -> LlmCall {
        LlmCall {
            purpose: CachePurpose::Analysis,
            tier: ModelTier::Fast,
            system: "you are a classifier".to_string(),
            user: user.to_string(),
            history: vec![],
            response_schema: None,
            message_id: None,
        }
    }

    fn json_call(user: &str) -> LlmCall {
        LlmCall {
            response_schema: Some(serde_json::json!({
                "type": "object",
                "required": ["answer"],
                "properties": {"answer": {"type": "string"}}
            })),
            ..text_call(user)
        }
    }

    #[tokio::test]
    async fn identical_calls_hit_the_cache() {
        let provider = Arc::new(MockProvider::new(vec![ok_response("{\"answer\": \"42\"}")]));
        let (gw, _store) = gateway(provider.clone());

        let call = json_call("what is the answer");
        let first = gw.call(&call, None).await.unwrap();
        let second = gw.call(&call, None).await.unwrap();

        assert_eq!(provider.call_count(), 1);
        assert!(!first.cache_hit);
        assert!(second.cache_hit);
        // Byte-identical parsed results.
        assert_eq!(
            serde_json::to_string(first.output.as_json().unwrap()).unwrap(),
            serde_json::to_string(second.output.as_json().unwrap()).unwrap(),
        );
    }

    #[tokio::test]
    async fn different_purpose_misses_the_cache() {
        let provider = Arc::new(MockProvider::new(vec![
            ok_response("first"),
            ok_response("second"),
        ]));
        let (gw, _store) = gateway(provider.clone());

        let a = text_call("same prompt");
        let mut b = text_call("same prompt");
        b.purpose = CachePurpose::Review;

        gw.call(&a, None).await.unwrap();
        gw.call(&b, None).await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_errors_are_retried() {
        let provider = Arc::new(MockProvider::new(vec![
            Err(ProviderError::Api {
                status: 503,
                message: "overloaded".into(),
            }),
            ok_response("recovered"),
        ]));
        let (gw, _store) = gateway(provider.clone());

        let result = gw.call(&text_call("hello"), None).await.unwrap();
        assert_eq!(provider.call_count(), 2);
        assert_eq!(result.output.as_text(), Some("recovered"));
    }

    #[tokio::test]
    async fn permanent_errors_fail_immediately() {
        let provider = Arc::new(MockProvider::new(vec![Err(ProviderError::Api {
            status: 401,
            message: "bad key".into(),
        })]));
        let (gw, _store) = gateway(provider.clone());

        let err = gw.call(&text_call("hello"), None).await.unwrap_err();
        assert_eq!(err.code(), "E_LLM_PERMANENT");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_after_three_attempts() {
        let provider = Arc::new(MockProvider::new(vec![
            Err(ProviderError::Api { status: 500, message: "a".into() }),
            Err(ProviderError::Api { status: 502, message: "b".into() }),
            Err(ProviderError::Api { status: 503, message: "c".into() }),
        ]));
        let (gw, _store) = gateway(provider.clone());

        let err = gw.call(&text_call("hello"), None).await.unwrap_err();
        assert_eq!(err.code(), "E_LLM_EXHAUSTED");
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_json_is_retried_schema_mismatch_is_not() {
        // First response is prose (transient), second is valid.
        let provider = Arc::new(MockProvider::new(vec![
            ok_response("sorry, I cannot help"),
            ok_response("{\"answer\": \"ok\"}"),
        ]));
        let (gw, _store) = gateway(provider.clone());
        let result = gw.call(&json_call("q1"), None).await.unwrap();
        assert_eq!(provider.call_count(), 2);
        assert!(result.output.as_json().is_some());

        // Well-formed JSON with the wrong shape fails without retrying.
        let provider = Arc::new(MockProvider::new(vec![ok_response("{\"nope\": true}")]));
        let (gw, _store) = gateway(provider.clone());
        let err = gw.call(&json_call("q2"), None).await.unwrap_err();
        assert_eq!(err.code(), "E_SCHEMA_MISMATCH");
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn cancelled_call_writes_no_cache() {
        let provider = Arc::new(MockProvider::new(vec![ok_response("unseen")]));
        let (gw, store) = gateway(provider.clone());

        let token = CancellationToken::new();
        token.cancel();
        let err = gw.call(&text_call("hello"), Some(&token)).await.unwrap_err();
        assert_eq!(err.code(), "CANCELLED");
        assert_eq!(provider.call_count(), 0);
        assert!(store.cache_search("unseen", 10).unwrap().is_empty());
    }

    #[tokio::test]
    async fn history_participates_in_the_hash() {
        let provider = Arc::new(MockProvider::new(vec![
            ok_response("a"),
            ok_response("b"),
        ]));
        let (gw, _store) = gateway(provider.clone());

        let bare = text_call("prompt");
        let mut with_history = text_call("prompt");
        with_history.history = vec![Message {
            role: Role::User,
            content: "earlier context".to_string(),
        }];

        gw.call(&bare, None).await.unwrap();
        gw.call(&with_history, None).await.unwrap();
        assert_eq!(provider.call_count(), 2);
    }
}
