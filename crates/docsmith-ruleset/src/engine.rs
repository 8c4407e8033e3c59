//! Ruleset application: modifications, rejection, quality flags.

use std::str::FromStr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use docsmith_llm::{LlmCall, LlmGateway, ModelTier};
use docsmith_store::types::{CachePurpose, NewProposal, ProposalStatus, UpdateType};

use crate::error::{Result, RulesetError};
use crate::parse::Ruleset;

const REJECT_PREFIX: &str = "rejected by ruleset";

/// Result of running a proposal through the ruleset passes.
#[derive(Debug, Clone)]
pub struct ReviewOutcome {
    pub proposal: NewProposal,
    /// Set when the rejection pass discarded the proposal.
    pub rejected: bool,
}

/// Applies a tenant's ruleset to generated proposals. Sections run in
/// order — modifications, rejection, quality — with an operator switch to
/// evaluate rejection first. A missing section is a no-op.
pub struct RulesetEngine {
    gateway: Arc<LlmGateway>,
    /// Swap `REJECTION_RULES` ahead of `REVIEW_MODIFICATIONS`.
    reject_before_modify: bool,
}

impl RulesetEngine {
    pub fn new(gateway: Arc<LlmGateway>, reject_before_modify: bool) -> Self {
        Self {
            gateway,
            reject_before_modify,
        }
    }

    /// Run the configured passes over one proposal.
    pub async fn apply(
        &self,
        ruleset: &Ruleset,
        proposal: NewProposal,
        cancel: Option<&CancellationToken>,
    ) -> Result<ReviewOutcome> {
        if ruleset.is_empty() {
            return Ok(ReviewOutcome {
                proposal,
                rejected: false,
            });
        }

        let mut outcome = ReviewOutcome {
            proposal,
            rejected: false,
        };

        if self.reject_before_modify {
            self.rejection_pass(ruleset, &mut outcome, cancel).await?;
            if !outcome.rejected {
                self.modification_pass(ruleset, &mut outcome, cancel).await?;
            }
        } else {
            self.modification_pass(ruleset, &mut outcome, cancel).await?;
            self.rejection_pass(ruleset, &mut outcome, cancel).await?;
        }

        // Quality gates are advisory and run even for rejected proposals —
        // the flags stay visible on the discarded record.
        self.quality_pass(ruleset, &mut outcome, cancel).await?;

        Ok(outcome)
    }

    async fn modification_pass(
        &self,
        ruleset: &Ruleset,
        outcome: &mut ReviewOutcome,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let Some(rules) = &ruleset.review_modifications else {
            return Ok(());
        };

        let proposal_json = serde_json::to_value(&outcome.proposal).unwrap_or_default();
        let call = LlmCall {
            purpose: CachePurpose::Review,
            tier: ModelTier::StrongAlt,
            system: "You review documentation-change proposals against tenant rules. \
                     Apply the rules to the proposal and return the FULL modified record \
                     as JSON. Echo fields you do not change."
                .to_string(),
            user: format!(
                "Rules:\n{rules}\n\nProposal:\n{}",
                serde_json::to_string_pretty(&proposal_json).unwrap_or_default()
            ),
            history: vec![],
            response_schema: Some(modified_record_schema()),
            message_id: outcome.proposal.message_ids.first().copied(),
        };

        let result = self.gateway.call(&call, cancel).await?;
        let value = result
            .output
            .as_json()
            .ok_or_else(|| RulesetError::BadResponse("expected JSON record".to_string()))?
            .clone();

        apply_modified_record(&mut outcome.proposal, &value)?;
        debug!(page = %outcome.proposal.page, "modification pass applied");
        Ok(())
    }

    async fn rejection_pass(
        &self,
        ruleset: &Ruleset,
        outcome: &mut ReviewOutcome,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let Some(rules) = &ruleset.rejection_rules else {
            return Ok(());
        };

        let call = LlmCall {
            purpose: CachePurpose::Review,
            tier: ModelTier::StrongAlt,
            system: "You evaluate documentation-change proposals against rejection rules. \
                     Respond with JSON: {\"reject\": bool, \"reason\": string}."
                .to_string(),
            user: format!(
                "Rules:\n{rules}\n\nProposal page: {}\nSuggested text ({} chars):\n{}",
                outcome.proposal.page,
                outcome.proposal.suggested_text.chars().count(),
                outcome.proposal.suggested_text
            ),
            history: vec![],
            response_schema: Some(serde_json::json!({
                "type": "object",
                "required": ["reject"],
                "properties": {
                    "reject": {"type": "boolean"},
                    "reason": {"type": "string"}
                }
            })),
            message_id: outcome.proposal.message_ids.first().copied(),
        };

        let result = self.gateway.call(&call, cancel).await?;
        let value = result
            .output
            .as_json()
            .ok_or_else(|| RulesetError::BadResponse("expected JSON verdict".to_string()))?
            .clone();

        if value["reject"].as_bool() == Some(true) {
            let reason = value["reason"].as_str().unwrap_or("rule matched");
            outcome.rejected = true;
            outcome.proposal.status = ProposalStatus::Ignored;
            outcome.proposal.discard_reason = Some(format!("{REJECT_PREFIX}: {reason}"));
            info!(page = %outcome.proposal.page, reason, "proposal rejected by ruleset");
        }
        Ok(())
    }

    async fn quality_pass(
        &self,
        ruleset: &Ruleset,
        outcome: &mut ReviewOutcome,
        cancel: Option<&CancellationToken>,
    ) -> Result<()> {
        let Some(rules) = &ruleset.quality_gates else {
            return Ok(());
        };

        let call = LlmCall {
            purpose: CachePurpose::Review,
            tier: ModelTier::StrongAlt,
            system: "You apply quality gates to documentation-change proposals. \
                     Respond with JSON: {\"flags\": [string]}. Empty list when no gate fires."
                .to_string(),
            user: format!(
                "Gates:\n{rules}\n\nProposal page: {}\nText:\n{}",
                outcome.proposal.page, outcome.proposal.suggested_text
            ),
            history: vec![],
            response_schema: Some(serde_json::json!({
                "type": "object",
                "required": ["flags"],
                "properties": {
                    "flags": {"type": "array", "items": {"type": "string"}}
                }
            })),
            message_id: outcome.proposal.message_ids.first().copied(),
        };

        let result = self.gateway.call(&call, cancel).await?;
        if let Some(value) = result.output.as_json() {
            if let Some(flags) = value["flags"].as_array() {
                outcome
                    .proposal
                    .quality_flags
                    .extend(flags.iter().filter_map(|f| f.as_str().map(String::from)));
            }
        }
        Ok(())
    }
}

fn modified_record_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["page", "update_type", "suggested_text", "confidence", "reasoning"],
        "properties": {
            "page": {"type": "string"},
            "update_type": {"enum": ["INSERT", "UPDATE", "DELETE", "NONE"]},
            "section": {"type": "string"},
            "location": {"type": "object"},
            "suggested_text": {"type": "string"},
            "confidence": {"type": "number"},
            "reasoning": {"type": "string"}
        }
    })
}

/// Fold the echoed (possibly modified) record back into the proposal.
fn apply_modified_record(proposal: &mut NewProposal, value: &serde_json::Value) -> Result<()> {
    let update_type = value["update_type"]
        .as_str()
        .and_then(|s| UpdateType::from_str(s).ok())
        .ok_or_else(|| RulesetError::BadResponse("bad update_type in record".to_string()))?;

    proposal.page = value["page"]
        .as_str()
        .ok_or_else(|| RulesetError::BadResponse("missing page in record".to_string()))?
        .to_string();
    proposal.update_type = update_type;
    proposal.suggested_text = value["suggested_text"]
        .as_str()
        .ok_or_else(|| RulesetError::BadResponse("missing suggested_text".to_string()))?
        .to_string();
    if let Some(section) = value["section"].as_str() {
        proposal.section = Some(section.to_string());
    }
    if value.get("location").map(|l| l.is_object()).unwrap_or(false) {
        proposal.location = Some(value["location"].clone());
    }
    if let Some(confidence) = value["confidence"].as_f64() {
        proposal.confidence = confidence.clamp(0.0, 1.0);
    }
    if let Some(reasoning) = value["reasoning"].as_str() {
        proposal.reasoning = reasoning.to_string();
    }
    Ok(())
}
