//! Proposal review state and changeset batches.
//!
//! The freeze rule lives here: a proposal whose `batch_id` is set can no
//! longer be edited or re-statused — every mutation path re-checks it and
//! fails with `E_FROZEN`.

use rusqlite::Connection;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::types::{ChangesetBatch, ChangesetStatus, DocProposal, NewProposal, ProposalStatus};
use crate::{now_rfc3339, parse_ts, Store};

/// Review-queue status of a conversation, computed from its proposals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Pending,
    Changeset,
    Discarded,
}

impl std::str::FromStr for ConversationStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ConversationStatus::Pending),
            "changeset" => Ok(ConversationStatus::Changeset),
            "discarded" => Ok(ConversationStatus::Discarded),
            other => Err(format!("unknown conversation status: {other}")),
        }
    }
}

/// One review-queue row: a conversation and everything proposed from it.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub status: ConversationStatus,
    pub proposals: Vec<DocProposal>,
}

impl Store {
    pub fn get_proposal(&self, id: i64) -> Result<Option<DocProposal>> {
        let db = self.db.lock().unwrap();
        get_proposal_conn(&db, id)
    }

    pub fn list_proposals(
        &self,
        status: Option<ProposalStatus>,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<DocProposal>, usize)> {
        let db = self.db.lock().unwrap();
        let (filter, param): (&str, Vec<String>) = match status {
            Some(s) => ("WHERE status = ?1", vec![s.to_string()]),
            None => ("", vec![]),
        };

        let total: i64 = db.query_row(
            &format!("SELECT COUNT(*) FROM doc_proposals {filter}"),
            rusqlite::params_from_iter(param.iter()),
            |row| row.get(0),
        )?;

        let mut stmt = db.prepare(&format!(
            "SELECT {PROPOSAL_COLS} FROM doc_proposals {filter}
             ORDER BY created_at DESC, id DESC LIMIT {limit} OFFSET {offset}"
        ))?;
        let rows = stmt.query_map(rusqlite::params_from_iter(param.iter()), row_to_proposal)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok((out, total as usize))
    }

    pub fn proposals_for_conversation(&self, conversation_id: &str) -> Result<Vec<DocProposal>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {PROPOSAL_COLS} FROM doc_proposals
             WHERE conversation_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([conversation_id], row_to_proposal)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    /// Count of other pending proposals targeting the same page — feeds the
    /// change-impact enrichment.
    pub fn pending_proposals_for_page(&self, page: &str, excluding: i64) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM doc_proposals
             WHERE page = ?1 AND status = 'pending' AND id != ?2",
            rusqlite::params![page, excluding],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }

    /// Reviewer edit of the proposal text. Fails with `E_FROZEN` once the
    /// proposal is attached to a changeset batch.
    pub fn update_proposal_text(&self, id: i64, text: &str, edited_by: &str) -> Result<DocProposal> {
        let db = self.db.lock().unwrap();
        let existing = get_proposal_conn(&db, id)?.ok_or_else(|| StoreError::NotFound {
            what: format!("proposal {id}"),
        })?;
        if let Some(batch_id) = existing.batch_id {
            return Err(StoreError::Frozen { id, batch_id });
        }

        db.execute(
            "UPDATE doc_proposals
             SET edited_text = ?2, edited_by = ?3, edited_at = ?4
             WHERE id = ?1",
            rusqlite::params![id, text, edited_by, now_rfc3339()],
        )?;
        get_proposal_conn(&db, id)?.ok_or_else(|| StoreError::NotFound {
            what: format!("proposal {id}"),
        })
    }

    /// Status transition from the review surface. Idempotent — re-approving
    /// an approved proposal is a no-op. Fails with `E_FROZEN` once batched.
    pub fn set_proposal_status(
        &self,
        id: i64,
        status: ProposalStatus,
        reviewed_by: &str,
        discard_reason: Option<&str>,
    ) -> Result<DocProposal> {
        let db = self.db.lock().unwrap();
        let existing = get_proposal_conn(&db, id)?.ok_or_else(|| StoreError::NotFound {
            what: format!("proposal {id}"),
        })?;
        if let Some(batch_id) = existing.batch_id {
            return Err(StoreError::Frozen { id, batch_id });
        }
        if existing.status == status {
            return Ok(existing);
        }

        // Ignored proposals carry a reason; leaving `ignored` clears it.
        let reason: Option<String> = match status {
            ProposalStatus::Ignored => Some(
                discard_reason
                    .unwrap_or("admin discarded change")
                    .to_string(),
            ),
            _ => None,
        };

        db.execute(
            "UPDATE doc_proposals
             SET status = ?2, discard_reason = ?3, reviewed_by = ?4, reviewed_at = ?5
             WHERE id = ?1",
            rusqlite::params![id, status.to_string(), reason, reviewed_by, now_rfc3339()],
        )?;
        get_proposal_conn(&db, id)?.ok_or_else(|| StoreError::NotFound {
            what: format!("proposal {id}"),
        })
    }

    /// Create a draft changeset batch from approved proposals and freeze
    /// them. All-or-nothing: one unbatchable proposal aborts the batch.
    pub fn create_changeset(&self, tenant_id: &str, proposal_ids: &[i64]) -> Result<ChangesetBatch> {
        let db = self.db.lock().unwrap();
        let tx = db.unchecked_transaction()?;
        let batch_id = Uuid::new_v4().to_string();
        let mut affected = Vec::new();

        for &pid in proposal_ids {
            let p = get_proposal_conn(&tx, pid)?.ok_or_else(|| StoreError::NotFound {
                what: format!("proposal {pid}"),
            })?;
            if let Some(existing) = p.batch_id {
                return Err(StoreError::Frozen {
                    id: pid,
                    batch_id: existing,
                });
            }
            if p.status != ProposalStatus::Approved {
                return Err(StoreError::Unavailable(format!(
                    "proposal {pid} is {} — only approved proposals can be batched",
                    p.status
                )));
            }
            if !affected.contains(&p.page) {
                affected.push(p.page.clone());
            }
            tx.execute(
                "UPDATE doc_proposals SET batch_id = ?2 WHERE id = ?1",
                rusqlite::params![pid, batch_id],
            )?;
        }

        let now = now_rfc3339();
        tx.execute(
            "INSERT INTO changeset_batches
             (batch_id, tenant_id, status, total_proposals, affected_files_json, created_at)
             VALUES (?1,?2,'draft',?3,?4,?5)",
            rusqlite::params![
                batch_id,
                tenant_id,
                proposal_ids.len() as i64,
                serde_json::to_string(&affected)?,
                now,
            ],
        )?;
        tx.commit()?;
        info!(%batch_id, proposals = proposal_ids.len(), "changeset batch created");

        drop(db);
        self.get_changeset(&batch_id)?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("changeset {batch_id}"),
            })
    }

    pub fn get_changeset(&self, batch_id: &str) -> Result<Option<ChangesetBatch>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {CHANGESET_COLS} FROM changeset_batches WHERE batch_id = ?1"),
            [batch_id],
            row_to_changeset,
        ) {
            Ok(b) => Ok(Some(b?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Hand-off point for the external PR collaborator: records title/body
    /// and transitions `draft → submitted`. Fails unless the batch is a
    /// draft. Proposal rows stay frozen (their `batch_id` is already set).
    pub fn submit_changeset(
        &self,
        batch_id: &str,
        pr_title: &str,
        pr_body: &str,
        submitted_by: &str,
    ) -> Result<ChangesetBatch> {
        {
            let db = self.db.lock().unwrap();
            let n = db.execute(
                "UPDATE changeset_batches
                 SET status = 'submitted', pr_title = ?2, pr_body = ?3,
                     submitted_by = ?4, submitted_at = ?5
                 WHERE batch_id = ?1 AND status = 'draft'",
                rusqlite::params![batch_id, pr_title, pr_body, submitted_by, now_rfc3339()],
            )?;
            if n == 0 {
                // Either unknown or already past draft — disambiguate.
                let exists: i64 = db.query_row(
                    "SELECT COUNT(*) FROM changeset_batches WHERE batch_id = ?1",
                    [batch_id],
                    |row| row.get(0),
                )?;
                if exists == 0 {
                    return Err(StoreError::NotFound {
                        what: format!("changeset {batch_id}"),
                    });
                }
                return Err(StoreError::BatchNotDraft {
                    batch_id: batch_id.to_string(),
                });
            }
        }
        self.get_changeset(batch_id)?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("changeset {batch_id}"),
            })
    }

    /// Record the external collaborator's PR coordinates on a submitted batch.
    pub fn set_changeset_pr(
        &self,
        batch_id: &str,
        pr_url: &str,
        pr_number: i64,
        branch_name: &str,
    ) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE changeset_batches
             SET pr_url = ?2, pr_number = ?3, branch_name = ?4
             WHERE batch_id = ?1",
            rusqlite::params![batch_id, pr_url, pr_number, branch_name],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("changeset {batch_id}"),
            });
        }
        Ok(())
    }

    /// Immutable history view: every batch that left draft, newest first.
    pub fn changeset_history(&self) -> Result<Vec<ChangesetBatch>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {CHANGESET_COLS} FROM changeset_batches
             WHERE status != 'draft' ORDER BY submitted_at DESC, id DESC"
        ))?;
        let rows = stmt.query_map([], row_to_changeset)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    /// An orphan proposal: its target page vanished from the doc snapshot
    /// between generation and PR time.
    pub fn mark_proposal_orphaned(&self, id: i64, error: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE doc_proposals
             SET pr_application_status = 'failed', pr_application_error = ?2
             WHERE id = ?1",
            rusqlite::params![id, error],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("proposal {id}"),
            });
        }
        Ok(())
    }

    /// Review-queue listing: conversations with their proposals, filtered by
    /// computed status, most recently proposed first.
    pub fn list_conversations(
        &self,
        status: ConversationStatus,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<ConversationSummary>, usize)> {
        // Aggregate per conversation, compute status, then hydrate a page.
        let aggregates: Vec<(String, i64, i64, i64, i64)> = {
            let db = self.db.lock().unwrap();
            let mut stmt = db.prepare(
                "SELECT conversation_id,
                        SUM(CASE WHEN batch_id IS NOT NULL THEN 1 ELSE 0 END),
                        SUM(CASE WHEN status = 'ignored' THEN 1 ELSE 0 END),
                        COUNT(*),
                        MAX(id)
                 FROM doc_proposals
                 GROUP BY conversation_id
                 ORDER BY MAX(id) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            })?;
            rows.filter_map(|r| r.ok()).collect()
        };

        let matching: Vec<&(String, i64, i64, i64, i64)> = aggregates
            .iter()
            .filter(|(_, batched, ignored, total, _)| {
                let computed = if *batched > 0 {
                    ConversationStatus::Changeset
                } else if ignored == total {
                    ConversationStatus::Discarded
                } else {
                    ConversationStatus::Pending
                };
                computed == status
            })
            .collect();

        let total = matching.len();
        let mut out = Vec::new();
        for (conversation_id, ..) in matching.into_iter().skip(offset).take(limit) {
            out.push(ConversationSummary {
                conversation_id: conversation_id.clone(),
                status,
                proposals: self.proposals_for_conversation(conversation_id)?,
            });
        }
        Ok((out, total))
    }
}

pub(crate) const PROPOSAL_COLS: &str = "id, tenant_id, conversation_id, message_ids_json, page, \
     update_type, section, location_json, suggested_text, edited_text, reasoning, confidence, \
     status, discard_reason, enrichment_json, quality_flags_json, batch_id, \
     pr_application_status, pr_application_error, created_at, reviewed_at, reviewed_by, \
     edited_at, edited_by";

pub(crate) const CHANGESET_COLS: &str = "id, batch_id, tenant_id, status, pr_title, pr_body, \
     pr_url, pr_number, branch_name, total_proposals, affected_files_json, created_at, \
     submitted_at, submitted_by";

fn get_proposal_conn(conn: &Connection, id: i64) -> Result<Option<DocProposal>> {
    match conn.query_row(
        &format!("SELECT {PROPOSAL_COLS} FROM doc_proposals WHERE id = ?1"),
        [id],
        row_to_proposal,
    ) {
        Ok(p) => Ok(Some(p?)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(StoreError::Database(e)),
    }
}

pub(crate) fn insert_proposal_tx(conn: &Connection, p: &NewProposal) -> Result<i64> {
    conn.execute(
        "INSERT INTO doc_proposals
         (tenant_id, conversation_id, message_ids_json, page, update_type, section,
          location_json, suggested_text, reasoning, confidence, status, discard_reason,
          enrichment_json, quality_flags_json, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15)",
        rusqlite::params![
            p.tenant_id,
            p.conversation_id,
            serde_json::to_string(&p.message_ids)?,
            p.page,
            p.update_type.to_string(),
            p.section,
            p.location
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            p.suggested_text,
            p.reasoning,
            p.confidence,
            p.status.to_string(),
            p.discard_reason,
            p.enrichment
                .as_ref()
                .map(serde_json::to_string)
                .transpose()?,
            serde_json::to_string(&p.quality_flags)?,
            now_rfc3339(),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn row_to_proposal(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<DocProposal>> {
    let message_ids_json: String = row.get(3)?;
    let update_type: String = row.get(5)?;
    let location_json: Option<String> = row.get(7)?;
    let status: String = row.get(12)?;
    let enrichment_json: Option<String> = row.get(14)?;
    let quality_flags_json: Option<String> = row.get(15)?;
    let created_at: String = row.get(19)?;
    let reviewed_at: Option<String> = row.get(20)?;
    let edited_at: Option<String> = row.get(22)?;

    Ok((|| {
        Ok(DocProposal {
            id: row.get(0).map_err(StoreError::Database)?,
            tenant_id: row.get(1).map_err(StoreError::Database)?,
            conversation_id: row.get(2).map_err(StoreError::Database)?,
            message_ids: serde_json::from_str(&message_ids_json)?,
            page: row.get(4).map_err(StoreError::Database)?,
            update_type: update_type.parse().map_err(StoreError::Corrupt)?,
            section: row.get(6).map_err(StoreError::Database)?,
            location: location_json
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            suggested_text: row.get(8).map_err(StoreError::Database)?,
            edited_text: row.get(9).map_err(StoreError::Database)?,
            reasoning: row.get(10).map_err(StoreError::Database)?,
            confidence: row.get(11).map_err(StoreError::Database)?,
            status: status.parse().map_err(StoreError::Corrupt)?,
            discard_reason: row.get(13).map_err(StoreError::Database)?,
            enrichment: enrichment_json
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            quality_flags: quality_flags_json
                .map(|s| serde_json::from_str(&s))
                .transpose()?
                .unwrap_or_default(),
            batch_id: row.get(16).map_err(StoreError::Database)?,
            pr_application_status: row.get(17).map_err(StoreError::Database)?,
            pr_application_error: row.get(18).map_err(StoreError::Database)?,
            created_at: parse_ts(&created_at)?,
            reviewed_at: reviewed_at.map(|s| parse_ts(&s)).transpose()?,
            reviewed_by: row.get(21).map_err(StoreError::Database)?,
            edited_at: edited_at.map(|s| parse_ts(&s)).transpose()?,
            edited_by: row.get(23).map_err(StoreError::Database)?,
        })
    })())
}

fn row_to_changeset(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<ChangesetBatch>> {
    let status: String = row.get(3)?;
    let affected_json: String = row.get(10)?;
    let created_at: String = row.get(11)?;
    let submitted_at: Option<String> = row.get(12)?;

    Ok((|| {
        Ok(ChangesetBatch {
            id: row.get(0).map_err(StoreError::Database)?,
            batch_id: row.get(1).map_err(StoreError::Database)?,
            tenant_id: row.get(2).map_err(StoreError::Database)?,
            status: status
                .parse::<ChangesetStatus>()
                .map_err(StoreError::Corrupt)?,
            pr_title: row.get(4).map_err(StoreError::Database)?,
            pr_body: row.get(5).map_err(StoreError::Database)?,
            pr_url: row.get(6).map_err(StoreError::Database)?,
            pr_number: row.get(7).map_err(StoreError::Database)?,
            branch_name: row.get(8).map_err(StoreError::Database)?,
            total_proposals: row.get::<_, i64>(9).map_err(StoreError::Database)? as u32,
            affected_files: serde_json::from_str(&affected_json)?,
            created_at: parse_ts(&created_at)?,
            submitted_at: submitted_at.map(|s| parse_ts(&s)).transpose()?,
            submitted_by: row.get(13).map_err(StoreError::Database)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UpdateType;

    fn proposal(conv: &str, page: &str) -> NewProposal {
        NewProposal {
            tenant_id: "t1".into(),
            conversation_id: conv.into(),
            message_ids: vec![1, 2],
            page: page.into(),
            update_type: UpdateType::Update,
            section: Some("Timeouts".into()),
            location: None,
            suggested_text: "Set `rpc_timeout` in the client config.".into(),
            reasoning: "question answered in chat".into(),
            confidence: 0.85,
            status: ProposalStatus::Pending,
            discard_reason: None,
            enrichment: None,
            quality_flags: vec![],
        }
    }

    fn insert(store: &Store, p: &NewProposal) -> i64 {
        let db = store.db.lock().unwrap();
        insert_proposal_tx(&db, p).unwrap()
    }

    #[test]
    fn status_transition_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        let id = insert(&store, &proposal("c1", "rpc.md"));

        let p1 = store
            .set_proposal_status(id, ProposalStatus::Approved, "admin", None)
            .unwrap();
        let p2 = store
            .set_proposal_status(id, ProposalStatus::Approved, "admin", None)
            .unwrap();
        assert_eq!(p1.status, ProposalStatus::Approved);
        assert_eq!(p2.status, ProposalStatus::Approved);
    }

    #[test]
    fn ignored_then_pending_then_approve_matches_direct_approve() {
        let store = Store::open_in_memory().unwrap();
        let a = insert(&store, &proposal("c1", "rpc.md"));
        let b = insert(&store, &proposal("c2", "rpc.md"));

        store
            .set_proposal_status(a, ProposalStatus::Ignored, "admin", Some("not useful"))
            .unwrap();
        store
            .set_proposal_status(a, ProposalStatus::Pending, "admin", None)
            .unwrap();
        let a = store
            .set_proposal_status(a, ProposalStatus::Approved, "admin", None)
            .unwrap();
        let b = store
            .set_proposal_status(b, ProposalStatus::Approved, "admin", None)
            .unwrap();

        assert_eq!(a.status, b.status);
        assert_eq!(a.discard_reason, None);
    }

    #[test]
    fn batching_freezes_proposals() {
        let store = Store::open_in_memory().unwrap();
        let id = insert(&store, &proposal("c1", "rpc.md"));
        store
            .set_proposal_status(id, ProposalStatus::Approved, "admin", None)
            .unwrap();

        let batch = store.create_changeset("t1", &[id]).unwrap();
        assert_eq!(batch.status, ChangesetStatus::Draft);
        assert_eq!(batch.total_proposals, 1);
        assert_eq!(batch.affected_files, vec!["rpc.md".to_string()]);

        let err = store.update_proposal_text(id, "nope", "admin").unwrap_err();
        assert_eq!(err.code(), "E_FROZEN");
        let err = store
            .set_proposal_status(id, ProposalStatus::Ignored, "admin", None)
            .unwrap_err();
        assert_eq!(err.code(), "E_FROZEN");
    }

    #[test]
    fn only_approved_proposals_can_be_batched() {
        let store = Store::open_in_memory().unwrap();
        let id = insert(&store, &proposal("c1", "rpc.md"));
        assert!(store.create_changeset("t1", &[id]).is_err());
        // The failed attempt must not have frozen the proposal.
        assert!(store.update_proposal_text(id, "still editable", "admin").is_ok());
    }

    #[test]
    fn submit_requires_draft() {
        let store = Store::open_in_memory().unwrap();
        let id = insert(&store, &proposal("c1", "rpc.md"));
        store
            .set_proposal_status(id, ProposalStatus::Approved, "admin", None)
            .unwrap();
        let batch = store.create_changeset("t1", &[id]).unwrap();

        let submitted = store
            .submit_changeset(&batch.batch_id, "Docs: rpc timeout", "body", "admin")
            .unwrap();
        assert_eq!(submitted.status, ChangesetStatus::Submitted);
        assert!(submitted.submitted_at.is_some());

        let err = store
            .submit_changeset(&batch.batch_id, "again", "body", "admin")
            .unwrap_err();
        assert_eq!(err.code(), "E_BATCH_NOT_DRAFT");

        let history = store.changeset_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].batch_id, batch.batch_id);
    }

    #[test]
    fn pr_coordinates_and_orphans_are_recorded() {
        let store = Store::open_in_memory().unwrap();
        let id = insert(&store, &proposal("c1", "rpc.md"));
        store
            .set_proposal_status(id, ProposalStatus::Approved, "admin", None)
            .unwrap();
        let batch = store.create_changeset("t1", &[id]).unwrap();
        store
            .submit_changeset(&batch.batch_id, "Docs: rpc", "body", "admin")
            .unwrap();

        // The external PR collaborator reports back its coordinates.
        store
            .set_changeset_pr(&batch.batch_id, "https://example.com/pr/7", 7, "docs/rpc-timeout")
            .unwrap();
        let batch = store.get_changeset(&batch.batch_id).unwrap().unwrap();
        assert_eq!(batch.pr_number, Some(7));
        assert_eq!(batch.branch_name.as_deref(), Some("docs/rpc-timeout"));

        // A proposal whose target page vanished is marked, not blocked.
        store
            .mark_proposal_orphaned(id, "page 'rpc.md' not found in documentation snapshot")
            .unwrap();
        let p = store.get_proposal(id).unwrap().unwrap();
        assert_eq!(p.pr_application_status.as_deref(), Some("failed"));
        assert!(p.pr_application_error.unwrap().contains("rpc.md"));
    }

    #[test]
    fn conversation_status_is_computed_from_proposals() {
        let store = Store::open_in_memory().unwrap();
        let a = insert(&store, &proposal("conv-a", "rpc.md"));
        let _b = insert(&store, &proposal("conv-b", "auth.md"));

        store
            .set_proposal_status(a, ProposalStatus::Ignored, "admin", Some("dup"))
            .unwrap();

        let (pending, total) = store
            .list_conversations(ConversationStatus::Pending, 10, 0)
            .unwrap();
        assert_eq!(total, 1);
        assert_eq!(pending[0].conversation_id, "conv-b");

        let (discarded, _) = store
            .list_conversations(ConversationStatus::Discarded, 10, 0)
            .unwrap();
        assert_eq!(discarded[0].conversation_id, "conv-a");
        assert_eq!(
            discarded[0].proposals[0].discard_reason.as_deref(),
            Some("dup")
        );
    }
}
