//! Changeset batches: assembly, PR hand-off and history.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use tracing::{info, warn};

use docsmith_store::types::ChangesetBatch;

use crate::app::{check_admin, AppState};
use crate::http::{bad_request, ok, store_error, unauthorized, ApiResult};

#[derive(Deserialize)]
pub struct CreateBatchRequest {
    pub proposal_ids: Vec<i64>,
    #[serde(default)]
    pub created_by: Option<String>,
}

/// POST /batches — create a draft changeset from approved proposals and
/// freeze them.
pub async fn create_batch(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<CreateBatchRequest>,
) -> ApiResult<ChangesetBatch> {
    if !check_admin(&state, &headers) {
        return unauthorized();
    }
    if req.proposal_ids.is_empty() {
        return bad_request("proposal_ids must not be empty");
    }

    let batch = state
        .store
        .create_changeset(&state.config.tenant.tenant_id, &req.proposal_ids)
        .map_err(store_error)?;
    info!(batch_id = %batch.batch_id, proposals = batch.total_proposals, "changeset created");
    ok(batch)
}

#[derive(Deserialize)]
pub struct GeneratePrRequest {
    pub pr_title: String,
    pub pr_body: String,
    pub proposal_ids: Vec<i64>,
    #[serde(default)]
    pub submitted_by: Option<String>,
}

/// POST /batches/:id/generate-pr — hand the batch to the external PR
/// collaborator: orphan-check every proposal against the current doc
/// snapshot, then transition `draft → submitted`.
pub async fn generate_pr(
    State(state): State<Arc<AppState>>,
    Path(batch_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<GeneratePrRequest>,
) -> ApiResult<ChangesetBatch> {
    if !check_admin(&state, &headers) {
        return unauthorized();
    }
    if req.pr_title.trim().is_empty() {
        return bad_request("pr_title must not be empty");
    }

    // Orphan pass: a proposal whose page vanished from the snapshot is
    // marked failed-to-apply but does not block the rest of the batch.
    let (index, _) = state
        .doc_index
        .get_or_generate(&state.config.tenant.documentation_commit)
        .map_err(|e| {
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                Json(crate::http::ApiError {
                    error: e.to_string(),
                    code: "INDEX_ERROR",
                }),
            )
        })?;
    for &pid in &req.proposal_ids {
        let Some(proposal) = state.store.get_proposal(pid).map_err(store_error)? else {
            continue;
        };
        if proposal.batch_id.as_deref() != Some(batch_id.as_str()) {
            return bad_request(format!("proposal {pid} is not part of batch {batch_id}"));
        }
        if !index.has_page(&proposal.page) && !index.plausible_new_page(&proposal.page) {
            warn!(proposal_id = pid, page = %proposal.page, "orphan proposal at PR time");
            state
                .store
                .mark_proposal_orphaned(
                    pid,
                    &format!("page '{}' not found in documentation snapshot", proposal.page),
                )
                .map_err(store_error)?;
        }
    }

    let batch = state
        .store
        .submit_changeset(
            &batch_id,
            &req.pr_title,
            &req.pr_body,
            req.submitted_by.as_deref().unwrap_or("admin"),
        )
        .map_err(store_error)?;
    info!(batch_id = %batch.batch_id, "changeset submitted for PR generation");
    ok(batch)
}

/// GET /batches/history — immutable view of everything past draft.
pub async fn batch_history(State(state): State<Arc<AppState>>) -> ApiResult<Vec<ChangesetBatch>> {
    let history = state.store.changeset_history().map_err(store_error)?;
    ok(history)
}
