//! Ordered, named step execution with per-step run logging.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docsmith_core::config::{PipelineConfig, TenantConfig};
use docsmith_docindex::DocIndex;
use docsmith_llm::LlmGateway;
use docsmith_ruleset::{Ruleset, RulesetEngine};
use docsmith_store::types::{NewClassification, NewProposal, NewRagContext, UnifiedMessage};
use docsmith_store::types::RunStatus;
use docsmith_store::Store;
use docsmith_vector::{Embedder, VectorStore};

use crate::conversation::Conversation;
use crate::error::{PipelineError, Result};

/// Shared, read-only dependencies for a pipeline run.
pub struct PipelineContext {
    pub store: Arc<Store>,
    pub gateway: Arc<LlmGateway>,
    pub embedder: Arc<dyn Embedder>,
    pub vectors: Arc<VectorStore>,
    pub ruleset_engine: Arc<RulesetEngine>,
    pub config: PipelineConfig,
    pub tenant: TenantConfig,
    pub doc_index: DocIndex,
    pub compact_index: String,
    pub cancel: CancellationToken,
}

/// One retrieved documentation chunk attached to a conversation.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievedDoc {
    pub path: String,
    pub title: String,
    pub summary: String,
    pub score: f32,
}

/// Mutable state threaded through the steps: `run(ctx, state) → state'`.
pub struct PipelineState {
    pub stream_id: String,
    pub batch_id: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub context_msgs: Vec<UnifiedMessage>,
    /// Shrinks as `filter` drops irrelevant messages.
    pub batch_msgs: Vec<UnifiedMessage>,
    /// Every message of the window — all are marked COMPLETED at commit,
    /// whether or not they survived filtering or classification.
    pub all_message_ids: Vec<i64>,
    pub conversations: Vec<Conversation>,
    pub classifications: Vec<NewClassification>,
    /// conversation id → retrieved docs, filled by the RAG step.
    pub retrieved: HashMap<String, Vec<RetrievedDoc>>,
    pub rag_contexts: Vec<NewRagContext>,
    pub proposals: Vec<NewProposal>,
    pub ruleset: Ruleset,
}

impl PipelineState {
    pub fn new(
        stream_id: String,
        batch_id: String,
        window_start: DateTime<Utc>,
        window_end: DateTime<Utc>,
        context_msgs: Vec<UnifiedMessage>,
        batch_msgs: Vec<UnifiedMessage>,
        ruleset: Ruleset,
    ) -> Self {
        let all_message_ids = batch_msgs.iter().map(|m| m.id).collect();
        Self {
            stream_id,
            batch_id,
            window_start,
            window_end,
            context_msgs,
            batch_msgs,
            all_message_ids,
            conversations: Vec::new(),
            classifications: Vec::new(),
            retrieved: HashMap::new(),
            rag_contexts: Vec::new(),
            proposals: Vec::new(),
            ruleset,
        }
    }

    /// Database ids of messages the classifier found valuable.
    pub fn valuable_ids(&self) -> HashSet<i64> {
        self.classifications.iter().map(|c| c.message_id).collect()
    }

    /// Conversations containing at least one valuable message.
    pub fn valuable_conversations(&self) -> Vec<&Conversation> {
        let valuable = self.valuable_ids();
        self.conversations
            .iter()
            .filter(|c| c.contains_any(&valuable))
            .collect()
    }
}

/// Outcome of one step.
#[derive(Debug)]
pub enum StepOutcome {
    Continue,
    /// Nothing for this step to do; later steps still run.
    Skip(String),
    /// Stop the remaining steps; the batch still commits.
    ShortCircuit(String),
}

/// A named pipeline step. Steps mutate the state in place and report how
/// the run should proceed; any `Err` rolls the whole batch back.
#[async_trait]
pub trait PipelineStep: Send + Sync {
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome>;
}

/// Executes the configured step list in order, writing one run-log row per
/// step. The step set is pluggable; `with_default_steps` wires the standard
/// eight.
pub struct Orchestrator {
    steps: Vec<Box<dyn PipelineStep>>,
}

impl Orchestrator {
    pub fn new(steps: Vec<Box<dyn PipelineStep>>) -> Self {
        Self { steps }
    }

    pub fn with_default_steps() -> Self {
        Self::new(vec![
            Box::new(crate::steps::filter::FilterStep),
            Box::new(crate::steps::classify::ClassifyStep),
            Box::new(crate::steps::enrich_rag::EnrichRagStep),
            Box::new(crate::steps::generate::GenerateStep),
            Box::new(crate::steps::context_enrich::ContextEnrichStep),
            Box::new(crate::steps::ruleset_review::RulesetReviewStep),
            Box::new(crate::steps::validate::ValidateStep),
            Box::new(crate::steps::condense::CondenseStep),
        ])
    }

    /// Run every step for a batch. The caller owns the transaction: this
    /// only mutates in-memory state plus the run log.
    pub async fn run_batch(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<()> {
        for step in &self.steps {
            if ctx.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let input_summary = serde_json::json!({
                "messages": state.batch_msgs.len(),
                "conversations": state.conversations.len(),
                "classifications": state.classifications.len(),
                "proposals": state.proposals.len(),
            });
            let log_id = ctx.store.run_log_start(
                &ctx.tenant.tenant_id,
                &state.batch_id,
                step.name(),
                Some(&input_summary),
            )?;

            match step.run(ctx, state).await {
                Ok(StepOutcome::Continue) => {
                    ctx.store.run_log_finish(
                        log_id,
                        RunStatus::Completed,
                        Some(&output_summary(state)),
                        None,
                    )?;
                }
                Ok(StepOutcome::Skip(reason)) => {
                    info!(step = step.name(), reason = %reason, "step skipped");
                    ctx.store.run_log_finish(
                        log_id,
                        RunStatus::Skipped,
                        Some(&output_summary(state)),
                        Some(&reason),
                    )?;
                }
                Ok(StepOutcome::ShortCircuit(reason)) => {
                    info!(step = step.name(), reason = %reason, "pipeline short-circuited");
                    ctx.store.run_log_finish(
                        log_id,
                        RunStatus::Completed,
                        Some(&output_summary(state)),
                        Some(&reason),
                    )?;
                    break;
                }
                Err(e) => {
                    warn!(step = step.name(), error = %e, "step failed, batch will roll back");
                    ctx.store
                        .run_log_finish(log_id, RunStatus::Failed, None, Some(&e.to_string()))?;
                    return Err(e);
                }
            }
        }
        Ok(())
    }
}

fn output_summary(state: &PipelineState) -> serde_json::Value {
    serde_json::json!({
        "messages": state.batch_msgs.len(),
        "conversations": state.conversations.len(),
        "classifications": state.classifications.len(),
        "rag_contexts": state.rag_contexts.len(),
        "proposals": state.proposals.len(),
    })
}
