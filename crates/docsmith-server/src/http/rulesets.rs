//! Tenant ruleset read/write.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};

use docsmith_ruleset::parse_ruleset;

use crate::app::{check_admin, AppState};
use crate::http::{bad_request, ok, store_error, ApiResult};

#[derive(Serialize)]
pub struct RulesetResponse {
    pub tenant_id: String,
    pub content_markdown: String,
    /// Which of the four recognised sections carry content.
    pub sections: Vec<&'static str>,
}

fn section_names(markdown: &str) -> Vec<&'static str> {
    let parsed = parse_ruleset(markdown);
    let mut names = Vec::new();
    if parsed.prompt_context.is_some() {
        names.push("PROMPT_CONTEXT");
    }
    if parsed.review_modifications.is_some() {
        names.push("REVIEW_MODIFICATIONS");
    }
    if parsed.rejection_rules.is_some() {
        names.push("REJECTION_RULES");
    }
    if parsed.quality_gates.is_some() {
        names.push("QUALITY_GATES");
    }
    names
}

/// GET /rulesets/:tenant_id
pub async fn get_ruleset(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
) -> ApiResult<RulesetResponse> {
    let content = state
        .store
        .get_ruleset(&tenant_id)
        .map_err(store_error)?
        .unwrap_or_default();
    ok(RulesetResponse {
        sections: section_names(&content),
        tenant_id,
        content_markdown: content,
    })
}

#[derive(Deserialize)]
pub struct PutRulesetRequest {
    pub content_markdown: String,
}

/// PUT /rulesets/:tenant_id
pub async fn put_ruleset(
    State(state): State<Arc<AppState>>,
    Path(tenant_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PutRulesetRequest>,
) -> ApiResult<RulesetResponse> {
    if !check_admin(&state, &headers) {
        return crate::http::unauthorized();
    }
    if tenant_id != state.config.tenant.tenant_id {
        return bad_request(format!("unknown tenant '{tenant_id}'"));
    }

    state
        .store
        .put_ruleset(&tenant_id, &req.content_markdown)
        .map_err(store_error)?;
    ok(RulesetResponse {
        sections: section_names(&req.content_markdown),
        tenant_id,
        content_markdown: req.content_markdown,
    })
}
