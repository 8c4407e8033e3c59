//! GET /runs/:batch_id — the pipeline run log for one processing batch.

use std::sync::Arc;

use axum::extract::{Path, State};

use docsmith_store::types::PipelineRun;

use crate::app::AppState;
use crate::http::{ok, store_error, ApiResult};

pub async fn runs_for_batch(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
) -> ApiResult<Vec<PipelineRun>> {
    let runs = state.store.runs_for_batch(&batch_id).map_err(store_error)?;
    ok(runs)
}
