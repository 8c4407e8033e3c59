//! Proposal review mutations. Both fail with `E_FROZEN` (409) once the
//! proposal is attached to a changeset batch.

use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use docsmith_store::types::{DocProposal, ProposalStatus};

use crate::app::{check_admin, AppState};
use crate::http::{bad_request, ok, store_error, unauthorized, ApiResult};

#[derive(Deserialize)]
pub struct UpdateTextRequest {
    pub suggested_text: String,
    pub edited_by: String,
}

/// PATCH /proposals/:id — reviewer edit of the proposed text.
pub async fn update_proposal_text(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<UpdateTextRequest>,
) -> ApiResult<DocProposal> {
    if !check_admin(&state, &headers) {
        return unauthorized();
    }
    if req.suggested_text.trim().is_empty() {
        return bad_request("suggested_text must not be empty");
    }

    let proposal = state
        .store
        .update_proposal_text(id, &req.suggested_text, &req.edited_by)
        .map_err(store_error)?;
    ok(proposal)
}

#[derive(Deserialize)]
pub struct SetStatusRequest {
    pub status: String,
    pub reviewed_by: String,
    /// Optional reviewer reason recorded on `ignored`.
    pub reason: Option<String>,
}

/// POST /proposals/:id/status — approve / ignore / back to pending.
/// Idempotent: repeating a transition is a no-op.
pub async fn set_proposal_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    headers: HeaderMap,
    Json(req): Json<SetStatusRequest>,
) -> ApiResult<DocProposal> {
    if !check_admin(&state, &headers) {
        return unauthorized();
    }
    let Ok(status) = ProposalStatus::from_str(&req.status) else {
        return bad_request(format!(
            "status must be pending, approved or ignored (got '{}')",
            req.status
        ));
    };

    let proposal = state
        .store
        .set_proposal_status(id, status, &req.reviewed_by, req.reason.as_deref())
        .map_err(store_error)?;
    ok(proposal)
}
