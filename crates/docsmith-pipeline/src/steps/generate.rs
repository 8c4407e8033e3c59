//! generate — one STRONG-tier call per valuable conversation.

use std::collections::HashSet;
use std::str::FromStr;

use async_trait::async_trait;
use tracing::{debug, warn};

use docsmith_llm::{LlmCall, ModelTier};
use docsmith_store::types::{CachePurpose, NewProposal, ProposalStatus, UpdateType};

use crate::error::Result;
use crate::format::render_conversation;
use crate::orchestrator::{PipelineContext, PipelineState, PipelineStep, StepOutcome};

pub struct GenerateStep;

pub(crate) fn proposal_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["proposals"],
        "properties": {
            "proposals": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["message_ids", "page", "update_type", "suggested_text",
                                 "confidence", "reasoning"],
                    "properties": {
                        "message_ids": {"type": "array", "items": {"type": "integer"}},
                        "page": {"type": "string"},
                        "update_type": {"enum": ["INSERT", "UPDATE", "DELETE", "NONE"]},
                        "section": {"type": "string"},
                        "location": {
                            "type": "object",
                            "properties": {
                                "after_heading": {"type": "string"},
                                "character_range": {"type": "array", "items": {"type": "integer"}},
                                "line_start": {"type": "integer"},
                                "line_end": {"type": "integer"}
                            }
                        },
                        "suggested_text": {"type": "string"},
                        "confidence": {"type": "number"},
                        "reasoning": {"type": "string"}
                    }
                }
            }
        }
    })
}

fn system_prompt(ctx: &PipelineContext) -> String {
    format!(
        "You draft documentation-change proposals for the project \"{}\". \
         Purpose of the documentation: {}. Target audience: {}. Style guide: {}. \
         Given a chat conversation and related existing documentation, propose \
         concrete changes. For each proposal return the contributing message ids, \
         the target page path, an update_type of INSERT, UPDATE, DELETE or NONE, \
         optionally a section and a location, the suggested text in the \
         documentation's voice, a confidence between 0.0 and 1.0, and your \
         reasoning. Return JSON only; an empty proposals list is valid.",
        ctx.tenant.project_name,
        ctx.tenant.doc_purpose,
        ctx.tenant.target_audience,
        ctx.tenant.style_guide,
    )
}

#[async_trait]
impl PipelineStep for GenerateStep {
    fn name(&self) -> &'static str {
        "generate"
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome> {
        let conversations: Vec<_> = state
            .valuable_conversations()
            .into_iter()
            .cloned()
            .collect();
        if conversations.is_empty() {
            return Ok(StepOutcome::Skip("no valuable conversations".to_string()));
        }

        // The tenant ruleset's PROMPT_CONTEXT is appended to the system
        // prompt verbatim.
        let mut system = system_prompt(ctx);
        if let Some(context) = &state.ruleset.prompt_context {
            system.push_str("\n\nTenant instructions:\n");
            system.push_str(context);
        }

        for conversation in conversations {
            let mut user = String::new();
            user.push_str("Conversation:\n");
            user.push_str(&render_conversation(&conversation));

            if let Some(docs) = state.retrieved.get(&conversation.id) {
                user.push_str("\nRelated documentation:\n");
                for doc in docs {
                    user.push_str(&format!(
                        "- {} — {} (similarity {:.2}): {}\n",
                        doc.path, doc.title, doc.score, doc.summary
                    ));
                }
            }
            if !ctx.compact_index.is_empty() {
                user.push_str("\nDocumentation index:\n");
                user.push_str(&ctx.compact_index);
            }

            let call = LlmCall {
                purpose: CachePurpose::Changegeneration,
                tier: ModelTier::Strong,
                system: system.clone(),
                user,
                history: vec![],
                response_schema: Some(proposal_schema()),
                message_id: conversation.messages.first().map(|m| m.id),
            };

            let result = ctx.gateway.call(&call, Some(&ctx.cancel)).await?;
            let Some(value) = result.output.as_json() else {
                continue;
            };

            let conversation_ids: HashSet<i64> =
                conversation.messages.iter().map(|m| m.id).collect();
            let entries = value["proposals"].as_array().cloned().unwrap_or_default();
            for entry in entries {
                let Some(update_type) = entry["update_type"]
                    .as_str()
                    .and_then(|s| UpdateType::from_str(s).ok())
                else {
                    continue;
                };
                if update_type == UpdateType::None {
                    continue;
                }
                let confidence = entry["confidence"].as_f64().unwrap_or(0.0).clamp(0.0, 1.0);
                if confidence < ctx.config.min_confidence {
                    debug!(
                        page = entry["page"].as_str().unwrap_or_default(),
                        confidence,
                        min = ctx.config.min_confidence,
                        "proposal below confidence threshold dropped"
                    );
                    continue;
                }

                // Keep only ids that actually belong to the conversation.
                let mut message_ids: Vec<i64> = entry["message_ids"]
                    .as_array()
                    .map(|a| {
                        a.iter()
                            .filter_map(|v| v.as_i64())
                            .filter(|id| conversation_ids.contains(id))
                            .collect()
                    })
                    .unwrap_or_default();
                if message_ids.is_empty() {
                    message_ids = conversation.message_ids();
                }

                let Some(page) = entry["page"].as_str().filter(|p| !p.is_empty()) else {
                    warn!("proposal without a page dropped");
                    continue;
                };

                state.proposals.push(NewProposal {
                    tenant_id: ctx.tenant.tenant_id.clone(),
                    conversation_id: conversation.id.clone(),
                    message_ids,
                    page: page.to_string(),
                    update_type,
                    section: entry["section"].as_str().map(String::from),
                    location: entry
                        .get("location")
                        .filter(|l| l.is_object())
                        .cloned(),
                    suggested_text: entry["suggested_text"].as_str().unwrap_or_default().to_string(),
                    reasoning: entry["reasoning"].as_str().unwrap_or_default().to_string(),
                    confidence,
                    status: ProposalStatus::Pending,
                    discard_reason: None,
                    enrichment: None,
                    quality_flags: vec![],
                });
            }
        }

        debug!(proposals = state.proposals.len(), "generation complete");
        Ok(StepOutcome::Continue)
    }
}
