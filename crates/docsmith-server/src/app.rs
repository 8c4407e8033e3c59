use std::sync::Arc;

use axum::http::HeaderMap;
use axum::{
    routing::{get, patch, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use docsmith_core::config::DocsmithConfig;
use docsmith_docindex::DocIndexService;
use docsmith_pipeline::BatchProcessor;
use docsmith_store::Store;
use docsmith_streams::StreamManager;
use docsmith_vector::{Embedder, VectorStore};

/// Central shared state — passed as Arc<AppState> to all handlers.
pub struct AppState {
    pub config: DocsmithConfig,
    pub store: Arc<Store>,
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<VectorStore>,
    pub doc_index: Arc<DocIndexService>,
    pub manager: Arc<StreamManager>,
    pub processor: Arc<BatchProcessor>,
}

/// Assemble the review API router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(crate::http::health::health_handler))
        .route(
            "/conversations",
            get(crate::http::conversations::list_conversations),
        )
        .route(
            "/proposals/{id}",
            patch(crate::http::proposals::update_proposal_text),
        )
        .route(
            "/proposals/{id}/status",
            post(crate::http::proposals::set_proposal_status),
        )
        .route("/batches", post(crate::http::batches::create_batch))
        .route(
            "/batches/{id}/generate-pr",
            post(crate::http::batches::generate_pr),
        )
        .route("/batches/history", get(crate::http::batches::batch_history))
        .route(
            "/rulesets/{tenant_id}",
            get(crate::http::rulesets::get_ruleset).put(crate::http::rulesets::put_ruleset),
        )
        .route("/llm-cache", get(crate::http::cache::search_cache))
        .route("/streams", get(crate::http::streams::list_streams))
        .route("/runs/{batch_id}", get(crate::http::runs::runs_for_batch))
        .route(
            "/webhooks/{stream_id}",
            post(crate::http::webhooks::receive_webhook),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bearer check against the configured admin token. All state-mutating
/// endpoints require it.
pub fn check_admin(state: &AppState, headers: &HeaderMap) -> bool {
    let expected = state.config.server.admin_token.as_str();
    if expected.is_empty() {
        return false;
    }
    extract_bearer(headers).map(|t| t == expected).unwrap_or(false)
}

pub fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer(&headers), None);
        headers.insert("authorization", HeaderValue::from_static("Bearer tok-1"));
        assert_eq!(extract_bearer(&headers), Some("tok-1"));
        headers.insert("authorization", HeaderValue::from_static("Basic zzz"));
        assert_eq!(extract_bearer(&headers), None);
    }
}
