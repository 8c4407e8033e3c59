//! validate — structural checks before anything is written.
//!
//! A proposal that fails validation is dropped (the surrounding batch
//! continues); it is a logic error local to that proposal, not a batch
//! failure.

use async_trait::async_trait;
use tracing::warn;

use docsmith_docindex::DocIndex;
use docsmith_store::types::{NewProposal, UpdateType};

use crate::error::Result;
use crate::orchestrator::{PipelineContext, PipelineState, PipelineStep, StepOutcome};

pub struct ValidateStep;

const LOCATION_KEYS: &[&str] = &["after_heading", "character_range", "line_start", "line_end"];

pub(crate) fn validate_proposal(proposal: &NewProposal, index: &DocIndex) -> std::result::Result<(), String> {
    if proposal.suggested_text.trim().is_empty() {
        return Err("suggested_text is empty".to_string());
    }
    if !(0.0..=1.0).contains(&proposal.confidence) {
        return Err(format!("confidence {} out of range", proposal.confidence));
    }

    let page_exists = index.has_page(&proposal.page);
    if !page_exists {
        // Only an INSERT may target a page that does not exist yet, and
        // only under the naming rules.
        if proposal.update_type != UpdateType::Insert {
            return Err(format!("page '{}' not in doc index", proposal.page));
        }
        if !index.plausible_new_page(&proposal.page) {
            return Err(format!("'{}' is not a plausible new page", proposal.page));
        }
    }

    if let Some(location) = &proposal.location {
        let Some(obj) = location.as_object() else {
            return Err("location is not an object".to_string());
        };
        for key in obj.keys() {
            if !LOCATION_KEYS.contains(&key.as_str()) {
                return Err(format!("unknown location key '{key}'"));
            }
        }
        // A heading reference must resolve against the indexed sections.
        if let Some(heading) = obj.get("after_heading").and_then(|h| h.as_str()) {
            if let Some(page) = index.page(&proposal.page) {
                if !page.sections.iter().any(|s| s == heading) {
                    return Err(format!(
                        "after_heading '{heading}' not found in '{}'",
                        proposal.page
                    ));
                }
            }
        }
    }

    Ok(())
}

#[async_trait]
impl PipelineStep for ValidateStep {
    fn name(&self) -> &'static str {
        "validate"
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome> {
        if state.proposals.is_empty() {
            return Ok(StepOutcome::Skip("no proposals to validate".to_string()));
        }

        let before = state.proposals.len();
        state.proposals.retain(|proposal| {
            match validate_proposal(proposal, &ctx.doc_index) {
                Ok(()) => true,
                Err(reason) => {
                    warn!(page = %proposal.page, %reason, "invalid proposal dropped");
                    false
                }
            }
        });

        let dropped = before - state.proposals.len();
        if dropped > 0 {
            warn!(dropped, kept = state.proposals.len(), "validation dropped proposals");
        }
        Ok(StepOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docsmith_docindex::DocPage;
    use docsmith_store::types::ProposalStatus;
    use std::collections::BTreeMap;

    fn index() -> DocIndex {
        DocIndex {
            pages: vec![DocPage {
                path: "reference/rpc.md".into(),
                title: "RPC".into(),
                sections: vec!["RPC".into(), "Timeouts".into()],
                summary: "rpc settings".into(),
                last_updated: None,
            }],
            categories: BTreeMap::new(),
            generated_at: Utc::now(),
        }
    }

    fn proposal(page: &str, update_type: UpdateType) -> NewProposal {
        NewProposal {
            tenant_id: "t".into(),
            conversation_id: "c".into(),
            message_ids: vec![1],
            page: page.into(),
            update_type,
            section: None,
            location: None,
            suggested_text: "Set `rpc_timeout`.".into(),
            reasoning: "r".into(),
            confidence: 0.8,
            status: ProposalStatus::Pending,
            discard_reason: None,
            enrichment: None,
            quality_flags: vec![],
        }
    }

    #[test]
    fn existing_page_update_passes() {
        assert!(validate_proposal(&proposal("reference/rpc.md", UpdateType::Update), &index()).is_ok());
    }

    #[test]
    fn update_of_unknown_page_fails() {
        assert!(validate_proposal(&proposal("ghost.md", UpdateType::Update), &index()).is_err());
    }

    #[test]
    fn insert_of_plausible_new_page_passes() {
        assert!(
            validate_proposal(&proposal("reference/streaming.md", UpdateType::Insert), &index()).is_ok()
        );
        assert!(
            validate_proposal(&proposal("elsewhere/streaming.md", UpdateType::Insert), &index()).is_err()
        );
    }

    #[test]
    fn empty_text_and_bad_confidence_fail() {
        let mut p = proposal("reference/rpc.md", UpdateType::Update);
        p.suggested_text = "  ".into();
        assert!(validate_proposal(&p, &index()).is_err());

        let mut p = proposal("reference/rpc.md", UpdateType::Update);
        p.confidence = 1.2;
        assert!(validate_proposal(&p, &index()).is_err());
    }

    #[test]
    fn location_references_must_resolve() {
        let mut p = proposal("reference/rpc.md", UpdateType::Update);
        p.location = Some(serde_json::json!({"after_heading": "Timeouts"}));
        assert!(validate_proposal(&p, &index()).is_ok());

        p.location = Some(serde_json::json!({"after_heading": "Nonexistent"}));
        assert!(validate_proposal(&p, &index()).is_err());

        p.location = Some(serde_json::json!({"weird_key": 1}));
        assert!(validate_proposal(&p, &index()).is_err());
    }
}
