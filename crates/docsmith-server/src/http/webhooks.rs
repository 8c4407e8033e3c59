//! POST /webhooks/:stream_id — push delivery into a registered stream.
//!
//! The payload goes through the same adapter normaliser as long-poll pulls,
//! so dedup and import watermarks behave identically in both modes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;

use crate::app::{check_admin, AppState};
use crate::http::{ok, store_error, unauthorized, ApiError, ApiResult};

#[derive(Serialize)]
pub struct WebhookResult {
    pub imported: bool,
}

pub async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(stream_id): Path<String>,
    headers: HeaderMap,
    Json(payload): Json<serde_json::Value>,
) -> ApiResult<WebhookResult> {
    if !check_admin(&state, &headers) {
        return unauthorized();
    }

    match state.manager.ingest_push(&stream_id, &payload).await {
        Ok(imported) => ok(WebhookResult { imported }),
        Err(docsmith_streams::StreamError::Store(e)) => Err(store_error(e)),
        Err(e) => Err((
            match &e {
                docsmith_streams::StreamError::NotRegistered(_) => {
                    axum::http::StatusCode::NOT_FOUND
                }
                docsmith_streams::StreamError::Config(_)
                | docsmith_streams::StreamError::Parse(_) => axum::http::StatusCode::BAD_REQUEST,
                _ => axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            },
            Json(ApiError {
                error: e.to_string(),
                code: e.code(),
            }),
        )),
    }
}
