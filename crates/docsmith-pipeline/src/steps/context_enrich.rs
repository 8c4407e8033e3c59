//! context-enrich — structured metadata attached to each generated proposal:
//! related docs, duplication warning, style analysis, change-impact metrics
//! and a short source-conversation summary.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::debug;

use docsmith_llm::{LlmCall, ModelTier};
use docsmith_store::types::CachePurpose;
use docsmith_vector::SearchFilter;

use crate::error::Result;
use crate::format::render_conversation;
use crate::orchestrator::{PipelineContext, PipelineState, PipelineStep, StepOutcome};

pub struct ContextEnrichStep;

/// Same-page similarity above this raises the duplication warning.
const DUPLICATION_THRESHOLD: f32 = 0.85;
/// Related docs kept on the enrichment record.
const RELATED_DOCS_TOP_N: usize = 3;

#[async_trait]
impl PipelineStep for ContextEnrichStep {
    fn name(&self) -> &'static str {
        "context_enrich"
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome> {
        if state.proposals.is_empty() {
            return Ok(StepOutcome::Skip("no proposals to enrich".to_string()));
        }

        // One embedding round-trip for all proposal texts.
        let texts: Vec<&str> = state
            .proposals
            .iter()
            .map(|p| p.suggested_text.as_str())
            .collect();
        let embeddings = ctx.embedder.embed(&texts).await?;

        // One summary per source conversation, shared by its proposals.
        let mut summaries: HashMap<String, String> = HashMap::new();
        for conversation in state.valuable_conversations() {
            if !state
                .proposals
                .iter()
                .any(|p| p.conversation_id == conversation.id)
            {
                continue;
            }
            let call = LlmCall {
                purpose: CachePurpose::Analysis,
                tier: ModelTier::Fast,
                system: "Summarise this chat conversation in one or two sentences for a \
                         documentation reviewer. Plain text."
                    .to_string(),
                user: render_conversation(conversation),
                history: vec![],
                response_schema: None,
                message_id: conversation.messages.first().map(|m| m.id),
            };
            let result = ctx.gateway.call(&call, Some(&ctx.cancel)).await?;
            if let Some(text) = result.output.as_text() {
                summaries.insert(conversation.id.clone(), text.trim().to_string());
            }
        }

        let filter = SearchFilter {
            tenant_id: Some(ctx.tenant.tenant_id.clone()),
            source: Some("docs".to_string()),
        };

        for (i, proposal) in state.proposals.iter_mut().enumerate() {
            // Duplication: cosine against existing content of the same page.
            let duplication = match embeddings.get(i) {
                Some(vec) => {
                    let hits = ctx.vectors.search(vec, ctx.config.rag_top_k, &filter)?;
                    let same_page = hits.iter().find(|h| h.key.key == proposal.page);
                    let max_similarity = same_page.map(|h| h.score).unwrap_or(0.0);
                    serde_json::json!({
                        "max_similarity": max_similarity,
                        "warning": max_similarity > DUPLICATION_THRESHOLD,
                    })
                }
                None => serde_json::json!({"max_similarity": 0.0, "warning": false}),
            };

            let related: Vec<serde_json::Value> = state
                .retrieved
                .get(&proposal.conversation_id)
                .map(|docs| {
                    docs.iter()
                        .take(RELATED_DOCS_TOP_N)
                        .map(|d| {
                            serde_json::json!({
                                "path": d.path, "title": d.title, "similarity": d.score,
                            })
                        })
                        .collect()
                })
                .unwrap_or_default();

            let target_sections = ctx
                .doc_index
                .page(&proposal.page)
                .map(|p| p.sections.len())
                .unwrap_or(0);
            let other_pending = ctx
                .store
                .pending_proposals_for_page(&proposal.page, -1)?;

            proposal.enrichment = Some(serde_json::json!({
                "related_docs": related,
                "duplication": duplication,
                "style": analyse_style(&proposal.suggested_text),
                "change_impact": {
                    "proposal_chars": proposal.suggested_text.chars().count(),
                    "target_section_count": target_sections,
                    "other_pending_proposals_on_page": other_pending,
                },
                "conversation_summary": summaries.get(&proposal.conversation_id),
            }));
        }

        debug!(enriched = state.proposals.len(), "proposals enriched");
        Ok(StepOutcome::Continue)
    }
}

/// Cheap style heuristics: sentence-length mean, format patterns, and a
/// technical-depth label from code-token density.
pub(crate) fn analyse_style(text: &str) -> serde_json::Value {
    let sentences: Vec<&str> = text
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let total_words: usize = sentences
        .iter()
        .map(|s| s.split_whitespace().count())
        .sum();
    let avg_sentence_words = if sentences.is_empty() {
        0.0
    } else {
        total_words as f64 / sentences.len() as f64
    };

    let has_headings = text.lines().any(|l| l.trim_start().starts_with('#'));
    let has_bullets = text
        .lines()
        .any(|l| l.trim_start().starts_with("- ") || l.trim_start().starts_with("* "));
    let has_code = text.contains("```") || text.contains('`');

    let code_tokens = text.matches('`').count() / 2;
    let words = text.split_whitespace().count().max(1);
    let density = code_tokens as f64 * 100.0 / words as f64;
    let technical_depth = if density > 8.0 {
        "deep"
    } else if density > 2.0 || has_code {
        "intermediate"
    } else {
        "basic"
    };

    serde_json::json!({
        "avg_sentence_words": avg_sentence_words,
        "format_patterns": {
            "headings": has_headings,
            "bullets": has_bullets,
            "code": has_code,
        },
        "technical_depth": technical_depth,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn style_detects_patterns() {
        let style = analyse_style("# Timeouts\n\n- Set `rpc_timeout` to 30s.\n- Restart the client.");
        assert_eq!(style["format_patterns"]["headings"], true);
        assert_eq!(style["format_patterns"]["bullets"], true);
        assert_eq!(style["format_patterns"]["code"], true);
        assert_ne!(style["technical_depth"], "basic");
    }

    #[test]
    fn style_plain_prose_is_basic() {
        let style = analyse_style("The service retries failed calls automatically. No action is needed.");
        assert_eq!(style["technical_depth"], "basic");
        assert_eq!(style["format_patterns"]["code"], false);
        let avg = style["avg_sentence_words"].as_f64().unwrap();
        assert!(avg > 3.0 && avg < 10.0);
    }
}
