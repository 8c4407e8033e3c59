//! GET /streams — operator view of registered adapters and watermarks.

use std::sync::Arc;

use axum::extract::State;
use serde::Serialize;

use docsmith_store::types::ImportWatermark;
use docsmith_streams::StreamStatus;

use crate::app::AppState;
use crate::http::{ok, store_error, ApiResult};

#[derive(Serialize)]
pub struct StreamView {
    #[serde(flatten)]
    pub status: StreamStatus,
    pub import_watermarks: Vec<ImportWatermark>,
    pub processing_watermark: Option<chrono::DateTime<chrono::Utc>>,
}

pub async fn list_streams(State(state): State<Arc<AppState>>) -> ApiResult<Vec<StreamView>> {
    let mut views = Vec::new();
    for status in state.manager.statuses() {
        let import_watermarks = state
            .store
            .import_watermarks_for_stream(&status.stream_id)
            .map_err(store_error)?;
        let processing_watermark = state
            .store
            .get_processing_watermark(&status.stream_id)
            .map_err(store_error)?
            .map(|w| w.watermark_time);
        views.push(StreamView {
            status,
            import_watermarks,
            processing_watermark,
        });
    }
    ok(views)
}
