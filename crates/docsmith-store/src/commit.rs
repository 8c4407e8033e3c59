//! Atomic batch commit.
//!
//! Everything a pipeline run produced for one stream window — conversation
//! assignments, classifications, RAG contexts, proposals, message status
//! flips — lands in one transaction together with the processing-watermark
//! advance. Partial results are never visible: any failure rolls the whole
//! window back and the next tick retries it.

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::Result;
use crate::messages::{insert_classification_tx, insert_rag_context_tx};
use crate::proposals::insert_proposal_tx;
use crate::types::{NewClassification, NewProposal, NewRagContext};
use crate::watermarks::advance_processing_watermark_tx;
use crate::Store;

/// Everything one pipeline run wants to durably commit for a batch.
#[derive(Debug, Clone)]
pub struct BatchCommit {
    pub stream_id: String,
    pub batch_id: String,
    /// The watermark value after this batch: `batch_end`.
    pub new_watermark: DateTime<Utc>,
    /// `(message row id, conversation id)` assignments for batch messages.
    pub conversation_assignments: Vec<(i64, String)>,
    pub classifications: Vec<NewClassification>,
    pub rag_contexts: Vec<NewRagContext>,
    pub proposals: Vec<NewProposal>,
    /// Batch messages to flip to COMPLETED (valuable or not — explicitly
    /// recorded as analysed).
    pub completed_message_ids: Vec<i64>,
}

impl Store {
    /// Commit a processed batch and advance the stream's watermark, all in
    /// one transaction.
    pub fn commit_batch(&self, commit: &BatchCommit) -> Result<i64> {
        let db = self.db.lock().unwrap();
        let tx = db.unchecked_transaction()?;

        for (message_id, conversation_id) in &commit.conversation_assignments {
            tx.execute(
                "UPDATE unified_messages SET conversation_id = ?2 WHERE id = ?1",
                rusqlite::params![message_id, conversation_id],
            )?;
        }
        for c in &commit.classifications {
            insert_classification_tx(&tx, c)?;
        }
        for r in &commit.rag_contexts {
            insert_rag_context_tx(&tx, r)?;
        }
        let mut proposal_count = 0i64;
        for p in &commit.proposals {
            insert_proposal_tx(&tx, p)?;
            proposal_count += 1;
        }
        for id in &commit.completed_message_ids {
            tx.execute(
                "UPDATE unified_messages
                 SET processing_status = 'COMPLETED', last_error = NULL
                 WHERE id = ?1",
                [id],
            )?;
        }

        advance_processing_watermark_tx(
            &tx,
            &commit.stream_id,
            &commit.new_watermark,
            Some(&commit.batch_id),
        )?;

        tx.commit()?;
        info!(
            stream_id = %commit.stream_id,
            batch_id = %commit.batch_id,
            classifications = commit.classifications.len(),
            proposals = proposal_count,
            watermark = %commit.new_watermark,
            "batch committed"
        );
        Ok(proposal_count)
    }

    /// Advance the watermark over an empty window. No batch artefacts, but
    /// the same monotonicity rules apply.
    pub fn advance_watermark_empty(
        &self,
        stream_id: &str,
        new_watermark: &DateTime<Utc>,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let tx = db.unchecked_transaction()?;
        advance_processing_watermark_tx(&tx, stream_id, new_watermark, None)?;
        tx.commit()?;
        Ok(())
    }
}
