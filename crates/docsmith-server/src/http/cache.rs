//! GET /llm-cache — search-with-related over the response cache.

use std::sync::Arc;

use axum::extract::{Query, State};
use serde::Deserialize;

use docsmith_store::cache::CacheSearchGroup;

use crate::app::AppState;
use crate::http::{bad_request, ok, store_error, ApiResult};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 500;

#[derive(Deserialize)]
pub struct CacheQuery {
    pub query: String,
    pub limit: Option<usize>,
}

/// Text-matches prompt/response, then returns *all* cache entries for every
/// message that had a hit, grouped by message.
pub async fn search_cache(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CacheQuery>,
) -> ApiResult<Vec<CacheSearchGroup>> {
    if query.query.trim().is_empty() {
        return bad_request("query must not be empty");
    }
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let groups = state
        .store
        .cache_search(&query.query, limit)
        .map_err(store_error)?;
    ok(groups)
}
