//! enrich(RAG) — one embed + one vector search per valuable conversation.

use async_trait::async_trait;
use tracing::debug;

use docsmith_store::types::NewRagContext;
use docsmith_vector::SearchFilter;

use crate::error::Result;
use crate::orchestrator::{PipelineContext, PipelineState, PipelineStep, RetrievedDoc, StepOutcome};

pub struct EnrichRagStep;

/// Rough prompt-token estimate: four characters per token.
fn estimate_tokens(text_len: usize) -> u32 {
    (text_len / 4) as u32
}

#[async_trait]
impl PipelineStep for EnrichRagStep {
    fn name(&self) -> &'static str {
        "enrich_rag"
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome> {
        let valuable = state.valuable_ids();
        let conversations: Vec<_> = state
            .valuable_conversations()
            .into_iter()
            .cloned()
            .collect();
        if conversations.is_empty() {
            return Ok(StepOutcome::Skip("no valuable conversations".to_string()));
        }

        for conversation in conversations {
            // Query: the conversation's text plus the classifier's search
            // criteria for its valuable members.
            let mut query = conversation
                .messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            for classification in &state.classifications {
                if valuable.contains(&classification.message_id)
                    && conversation.messages.iter().any(|m| m.id == classification.message_id)
                {
                    for criterion in &classification.rag_search_criteria {
                        query.push('\n');
                        query.push_str(criterion);
                    }
                }
            }

            let vectors = ctx.embedder.embed(&[&query]).await?;
            let Some(query_vec) = vectors.into_iter().next() else {
                continue;
            };

            let filter = SearchFilter {
                tenant_id: Some(ctx.tenant.tenant_id.clone()),
                source: Some("docs".to_string()),
            };
            let hits = ctx.vectors.search(&query_vec, ctx.config.rag_top_k, &filter)?;

            let docs: Vec<RetrievedDoc> = hits
                .into_iter()
                .map(|hit| RetrievedDoc {
                    path: hit.key.key,
                    title: hit.metadata["title"].as_str().unwrap_or_default().to_string(),
                    summary: hit.metadata["summary"].as_str().unwrap_or_default().to_string(),
                    score: hit.score,
                })
                .collect();

            let total_chars: usize = docs.iter().map(|d| d.title.len() + d.summary.len()).sum();
            state.rag_contexts.push(NewRagContext {
                conversation_id: conversation.id.clone(),
                retrieved_docs: serde_json::to_value(&docs).unwrap_or_default(),
                total_tokens: estimate_tokens(total_chars),
            });
            debug!(conversation_id = %conversation.id, docs = docs.len(), "rag context retrieved");
            state.retrieved.insert(conversation.id.clone(), docs);
        }

        Ok(StepOutcome::Continue)
    }
}
