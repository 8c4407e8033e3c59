//! GET /conversations — the review queue, grouped by conversation.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Query, State};
use serde::Deserialize;

use docsmith_store::proposals::{ConversationStatus, ConversationSummary};

use crate::app::AppState;
use crate::http::{bad_request, ok_paginated, store_error, ApiResult};

const DEFAULT_LIMIT: usize = 50;
const MAX_LIMIT: usize = 200;

#[derive(Deserialize)]
pub struct ConversationsQuery {
    #[serde(default = "default_status")]
    pub status: String,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

fn default_status() -> String {
    "pending".to_string()
}

pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConversationsQuery>,
) -> ApiResult<Vec<ConversationSummary>> {
    let Ok(status) = ConversationStatus::from_str(&query.status) else {
        return bad_request(format!(
            "status must be pending, changeset or discarded (got '{}')",
            query.status
        ));
    };
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT);
    let offset = query.offset.unwrap_or(0);

    let (conversations, total) = state
        .store
        .list_conversations(status, limit, offset)
        .map_err(store_error)?;
    ok_paginated(conversations, limit, offset, total)
}
