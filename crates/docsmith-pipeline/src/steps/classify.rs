//! classify — one FAST-tier call over the whole batch.

use std::collections::HashSet;

use async_trait::async_trait;
use tracing::{debug, warn};

use docsmith_llm::{LlmCall, ModelTier};
use docsmith_store::types::{CachePurpose, NewClassification};

use crate::error::{PipelineError, Result};
use crate::format::render_classification_input;
use crate::orchestrator::{PipelineContext, PipelineState, PipelineStep, StepOutcome};

pub struct ClassifyStep;

const CATEGORIES: &[&str] = &[
    "information",
    "troubleshooting",
    "update",
    "announcement",
    "tutorial",
    "question_with_answer",
];

pub(crate) fn classification_schema() -> serde_json::Value {
    serde_json::json!({
        "type": "object",
        "required": ["messages_with_doc_value", "total_analyzed"],
        "properties": {
            "messages_with_doc_value": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["message_id", "category", "doc_value_reason", "rag_search_criteria"],
                    "properties": {
                        "message_id": {"type": "integer"},
                        "category": {"enum": CATEGORIES},
                        "doc_value_reason": {"type": "string"},
                        "suggested_doc_page": {"type": "string"},
                        "rag_search_criteria": {"type": "array", "items": {"type": "string"}}
                    }
                }
            },
            "total_analyzed": {"type": "integer"},
            "messages_with_value": {"type": "integer"},
            "context_used": {"type": "boolean"}
        }
    })
}

fn system_prompt(ctx: &PipelineContext) -> String {
    format!(
        "You classify community-chat messages for documentation value for the \
         project \"{}\". A message has value when it contains information, a \
         troubleshooting exchange, an update, an announcement, a tutorial, or a \
         question with its answer that the documentation should reflect. For each \
         valuable message return its id, a category from {CATEGORIES:?}, why it has \
         value, optionally a suggested documentation page, and 3 to 6 short search \
         criteria for retrieving related documentation. An empty list is a valid \
         answer. Respond with JSON only.",
        ctx.tenant.project_name
    )
}

#[async_trait]
impl PipelineStep for ClassifyStep {
    fn name(&self) -> &'static str {
        "classify"
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome> {
        let mut user = render_classification_input(&state.context_msgs, &state.batch_msgs);
        if !ctx.compact_index.is_empty() {
            user.push_str("\nDocumentation index:\n");
            user.push_str(&ctx.compact_index);
        }

        let call = LlmCall {
            purpose: CachePurpose::Analysis,
            tier: ModelTier::Fast,
            system: system_prompt(ctx),
            user,
            history: vec![],
            response_schema: Some(classification_schema()),
            message_id: state.batch_msgs.first().map(|m| m.id),
        };

        let result = ctx.gateway.call(&call, Some(&ctx.cancel)).await?;
        let value = result
            .output
            .as_json()
            .ok_or_else(|| PipelineError::Step {
                step: "classify".to_string(),
                message: "expected JSON classification".to_string(),
            })?
            .clone();

        let known_ids: HashSet<i64> = state.batch_msgs.iter().map(|m| m.id).collect();
        let model_used = ctx.gateway.model_name(ModelTier::Fast).to_string();

        let entries = value["messages_with_doc_value"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for entry in entries {
            let Some(message_id) = entry["message_id"].as_i64() else {
                continue;
            };
            if !known_ids.contains(&message_id) {
                warn!(message_id, "classifier referenced an unknown message id");
                continue;
            }
            let criteria: Vec<String> = entry["rag_search_criteria"]
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(|c| c.as_str().map(String::from))
                        .take(6)
                        .collect()
                })
                .unwrap_or_default();

            state.classifications.push(NewClassification {
                message_id,
                batch_id: state.batch_id.clone(),
                category: entry["category"].as_str().unwrap_or("information").to_string(),
                doc_value_reason: entry["doc_value_reason"].as_str().unwrap_or_default().to_string(),
                suggested_doc_page: entry["suggested_doc_page"].as_str().map(String::from),
                rag_search_criteria: criteria,
                model_used: model_used.clone(),
            });
        }

        debug!(
            valuable = state.classifications.len(),
            analyzed = state.batch_msgs.len(),
            cache_hit = result.cache_hit,
            "batch classified"
        );
        Ok(StepOutcome::Continue)
    }
}
