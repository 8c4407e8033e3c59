//! The batch processor: per-stream 24-hour windows behind the processing
//! watermark.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use docsmith_core::config::{PipelineConfig, TenantConfig};
use docsmith_docindex::DocIndexService;
use docsmith_llm::LlmGateway;
use docsmith_ruleset::{parse_ruleset, Ruleset, RulesetEngine};
use docsmith_store::commit::BatchCommit;
use docsmith_store::types::ProcessingStatus;
use docsmith_store::Store;
use docsmith_vector::{Embedder, VectorStore};

use crate::error::{PipelineError, Result};
use crate::orchestrator::{Orchestrator, PipelineContext, PipelineState};

/// A fresh stream with no messages starts this far back.
const BOOTSTRAP_LOOKBACK_DAYS: i64 = 7;

/// What one tick did.
#[derive(Debug, Default, Clone)]
pub struct TickSummary {
    pub batches_committed: usize,
    pub empty_windows_advanced: usize,
    pub streams_deferred: usize,
    pub streams_failed: usize,
    pub proposals_written: usize,
}

enum StreamOutcome {
    Committed { proposals: usize },
    EmptyAdvanced,
    Deferred,
}

/// Drives batches for every stream with pending work. One instance per
/// tenant; per-stream advisory locks make overlapping ticks safe, and a
/// contended stream simply yields to the tick that holds it.
pub struct BatchProcessor {
    store: Arc<Store>,
    gateway: Arc<LlmGateway>,
    embedder: Arc<dyn Embedder>,
    vectors: Arc<VectorStore>,
    ruleset_engine: Arc<RulesetEngine>,
    doc_index: Arc<DocIndexService>,
    config: PipelineConfig,
    tenant: TenantConfig,
    orchestrator: Orchestrator,
    cancel: CancellationToken,
    stream_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl BatchProcessor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<Store>,
        gateway: Arc<LlmGateway>,
        embedder: Arc<dyn Embedder>,
        vectors: Arc<VectorStore>,
        ruleset_engine: Arc<RulesetEngine>,
        doc_index: Arc<DocIndexService>,
        config: PipelineConfig,
        tenant: TenantConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            gateway,
            embedder,
            vectors,
            ruleset_engine,
            doc_index,
            config,
            tenant,
            orchestrator: Orchestrator::with_default_steps(),
            cancel,
            stream_locks: DashMap::new(),
        }
    }

    fn batch_window(&self) -> Duration {
        Duration::hours(self.config.batch_window_hours as i64)
    }

    fn context_window(&self) -> Duration {
        Duration::hours(self.config.context_window_hours as i64)
    }

    /// One pass over every stream with old-enough pending messages.
    pub async fn tick(&self) -> Result<TickSummary> {
        let now = Utc::now();
        let cutoff = now - self.batch_window();
        let streams = self.store.next_pending_streams(&cutoff)?;

        let mut summary = TickSummary::default();
        for stream_id in streams {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }

            let lock = self
                .stream_locks
                .entry(stream_id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone();
            // Contention yields — another tick owns this stream right now.
            let Ok(_guard) = lock.try_lock() else {
                summary.streams_deferred += 1;
                continue;
            };

            match self.process_stream(&stream_id, now).await {
                Ok(StreamOutcome::Committed { proposals }) => {
                    summary.batches_committed += 1;
                    summary.proposals_written += proposals;
                }
                Ok(StreamOutcome::EmptyAdvanced) => summary.empty_windows_advanced += 1,
                Ok(StreamOutcome::Deferred) => summary.streams_deferred += 1,
                Err(PipelineError::Cancelled) => return Err(PipelineError::Cancelled),
                Err(e) => {
                    warn!(stream_id = %stream_id, error = %e, "stream batch failed");
                    summary.streams_failed += 1;
                }
            }
        }
        Ok(summary)
    }

    async fn process_stream(&self, stream_id: &str, now: DateTime<Utc>) -> Result<StreamOutcome> {
        // Bootstrap: a stream seen for the first time starts at its earliest
        // message (or a bounded lookback when somehow empty). Per-stream —
        // a new stream never skips its own history.
        let watermark = match self.store.get_processing_watermark(stream_id)? {
            Some(wm) => wm.watermark_time,
            None => {
                let start = self
                    .store
                    .earliest_message_time(stream_id)?
                    .unwrap_or_else(|| now - Duration::days(BOOTSTRAP_LOOKBACK_DAYS));
                self.store
                    .init_processing_watermark(stream_id, &start)?
                    .watermark_time
            }
        };

        let batch_end = watermark + self.batch_window();
        if batch_end > now {
            return Ok(StreamOutcome::Deferred);
        }

        let context_msgs =
            self.store
                .messages_in_range(stream_id, &(watermark - self.context_window()), &watermark)?;
        let mut batch_msgs: Vec<_> = self
            .store
            .messages_in_range(stream_id, &watermark, &batch_end)?
            .into_iter()
            .filter(|m| m.processing_status == ProcessingStatus::Pending)
            .collect();

        if batch_msgs.is_empty() {
            self.store.advance_watermark_empty(stream_id, &batch_end)?;
            info!(stream_id, watermark = %batch_end, "empty window skipped");
            return Ok(StreamOutcome::EmptyAdvanced);
        }

        // Oversized windows defer the excess: the watermark only advances to
        // the first excluded message, so the next tick picks it up.
        let mut effective_end = batch_end;
        if batch_msgs.len() > self.config.max_batch_size {
            effective_end = batch_msgs[self.config.max_batch_size].timestamp;
            batch_msgs.truncate(self.config.max_batch_size);
            info!(
                stream_id,
                kept = batch_msgs.len(),
                new_end = %effective_end,
                "batch truncated to max size, excess deferred"
            );
        }

        let batch_id = batch_id(stream_id, &watermark, &batch_end);
        let ruleset = self.load_ruleset()?;
        let (doc_index, compact_index) = self
            .doc_index
            .get_or_generate(&self.tenant.documentation_commit)?;

        let ctx = PipelineContext {
            store: Arc::clone(&self.store),
            gateway: Arc::clone(&self.gateway),
            embedder: Arc::clone(&self.embedder),
            vectors: Arc::clone(&self.vectors),
            ruleset_engine: Arc::clone(&self.ruleset_engine),
            config: self.config.clone(),
            tenant: self.tenant.clone(),
            doc_index,
            compact_index,
            cancel: self.cancel.child_token(),
        };
        let mut state = PipelineState::new(
            stream_id.to_string(),
            batch_id.clone(),
            watermark,
            effective_end,
            context_msgs,
            batch_msgs,
            ruleset,
        );

        match self.orchestrator.run_batch(&ctx, &mut state).await {
            Ok(()) => {
                let conversation_assignments = state
                    .conversations
                    .iter()
                    .flat_map(|c| c.messages.iter().map(|m| (m.id, c.id.clone())))
                    .collect();
                let proposals = state.proposals.len();
                self.store.commit_batch(&BatchCommit {
                    stream_id: stream_id.to_string(),
                    batch_id: batch_id.clone(),
                    new_watermark: effective_end,
                    conversation_assignments,
                    classifications: std::mem::take(&mut state.classifications),
                    rag_contexts: std::mem::take(&mut state.rag_contexts),
                    proposals: std::mem::take(&mut state.proposals),
                    completed_message_ids: state.all_message_ids.clone(),
                })?;
                info!(stream_id, %batch_id, proposals, "batch committed");
                Ok(StreamOutcome::Committed { proposals })
            }
            Err(PipelineError::Cancelled) => {
                // Clean abort: watermark untouched, no failure recorded; the
                // next tick retries the identical window.
                Err(PipelineError::Cancelled)
            }
            Err(e) => {
                self.store
                    .bump_failure_counts(&state.all_message_ids, &e.to_string())?;
                let failed = self.store.mark_failed_messages(self.config.max_failures)?;
                if failed > 0 {
                    warn!(stream_id, failed, "messages exhausted their retry budget");
                }
                Err(e)
            }
        }
    }

    fn load_ruleset(&self) -> Result<Ruleset> {
        Ok(self
            .store
            .get_ruleset(&self.tenant.tenant_id)?
            .map(|md| parse_ruleset(&md))
            .unwrap_or_default())
    }
}

/// Deterministic batch id: `hash(stream_id, window_start, window_end)`.
/// Re-running a rolled-back batch yields the same id.
pub fn batch_id(stream_id: &str, start: &DateTime<Utc>, end: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stream_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(start.to_rfc3339().as_bytes());
    hasher.update([0x1f]);
    hasher.update(end.to_rfc3339().as_bytes());
    format!("batch-{}", &hex::encode(hasher.finalize())[..16])
}
