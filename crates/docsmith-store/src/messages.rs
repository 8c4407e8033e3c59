//! Message ingestion and lookup, plus classification and RAG-context reads.
//!
//! Messages are immutable once written except for `processing_status`,
//! `failure_count`, `last_error`, `conversation_id` and `embedding_json`.

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::types::{
    MessageClassification, NewMessage, ProcessingStatus, RagContext, UnifiedMessage,
};
use crate::{now_rfc3339, parse_ts, ts_to_sql, Store};

impl Store {
    /// Insert a normalised message. Returns `true` when a row was written,
    /// `false` when `(stream_id, message_id)` already existed — re-imports
    /// are silently deduplicated.
    pub fn insert_message(&self, msg: &NewMessage) -> Result<bool> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "INSERT OR IGNORE INTO unified_messages
             (tenant_id, stream_id, message_id, timestamp, author, content,
              channel, raw_data, metadata_json, processing_status, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,'PENDING',?10)",
            rusqlite::params![
                msg.tenant_id,
                msg.stream_id,
                msg.message_id,
                ts_to_sql(&msg.timestamp),
                msg.author,
                msg.content,
                msg.channel,
                msg.raw_data,
                serde_json::to_string(&msg.metadata)?,
                now_rfc3339(),
            ],
        )?;
        Ok(n > 0)
    }

    pub fn get_message(&self, id: i64) -> Result<Option<UnifiedMessage>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {MESSAGE_COLS} FROM unified_messages WHERE id = ?1"),
            [id],
            row_to_message,
        ) {
            Ok(m) => Ok(Some(m?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Messages of one stream with `timestamp ∈ [from, to)`, oldest first.
    /// Ties on timestamp break on insertion id so batch order is stable.
    pub fn messages_in_range(
        &self,
        stream_id: &str,
        from: &DateTime<Utc>,
        to: &DateTime<Utc>,
    ) -> Result<Vec<UnifiedMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM unified_messages
             WHERE stream_id = ?1 AND timestamp >= ?2 AND timestamp < ?3
             ORDER BY timestamp, id"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![stream_id, ts_to_sql(from), ts_to_sql(to)],
            row_to_message,
        )?;
        collect_messages(rows)
    }

    /// Earliest message timestamp for a stream — used to bootstrap the
    /// processing watermark for a newly seen stream.
    pub fn earliest_message_time(&self, stream_id: &str) -> Result<Option<DateTime<Utc>>> {
        let db = self.db.lock().unwrap();
        let ts: Option<String> = db.query_row(
            "SELECT MIN(timestamp) FROM unified_messages WHERE stream_id = ?1",
            [stream_id],
            |row| row.get(0),
        )?;
        ts.map(|s| parse_ts(&s)).transpose()
    }

    /// Number of PENDING messages for a stream (backpressure signal).
    pub fn pending_count(&self, stream_id: &str) -> Result<u64> {
        let db = self.db.lock().unwrap();
        let n: i64 = db.query_row(
            "SELECT COUNT(*) FROM unified_messages
             WHERE stream_id = ?1 AND processing_status = 'PENDING'",
            [stream_id],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    /// Streams with at least one PENDING message old enough that its batch
    /// window can have closed (`timestamp <= cutoff`, cutoff = now − window).
    pub fn next_pending_streams(&self, cutoff: &DateTime<Utc>) -> Result<Vec<String>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT DISTINCT stream_id FROM unified_messages
             WHERE processing_status = 'PENDING' AND timestamp <= ?1
             ORDER BY stream_id",
        )?;
        let rows = stmt.query_map([ts_to_sql(cutoff)], |row| row.get::<_, String>(0))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Record a batch-level failure on each constituent message.
    pub fn bump_failure_counts(&self, ids: &[i64], error: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare_cached(
            "UPDATE unified_messages
             SET failure_count = failure_count + 1, last_error = ?2
             WHERE id = ?1",
        )?;
        for id in ids {
            stmt.execute(rusqlite::params![id, error])?;
        }
        Ok(())
    }

    /// Flip messages whose retry budget is exhausted to FAILED so later
    /// batches skip them. Returns the number of messages given up on.
    pub fn mark_failed_messages(&self, max_failures: u32) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE unified_messages SET processing_status = 'FAILED'
             WHERE processing_status = 'PENDING' AND failure_count >= ?1",
            [max_failures as i64],
        )?;
        if n > 0 {
            debug!(count = n, "messages marked FAILED after retry budget");
        }
        Ok(n)
    }

    /// Store the embedding vector computed for a message.
    pub fn set_message_embedding(&self, id: i64, embedding: &[f32]) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE unified_messages SET embedding_json = ?2 WHERE id = ?1",
            rusqlite::params![id, serde_json::to_string(embedding)?],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("message {id}"),
            });
        }
        Ok(())
    }

    pub fn classification_for_message(
        &self,
        message_id: i64,
    ) -> Result<Option<MessageClassification>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {CLASSIFICATION_COLS} FROM message_classifications
                 WHERE message_id = ?1"
            ),
            [message_id],
            row_to_classification,
        ) {
            Ok(c) => Ok(Some(c?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Every classification produced by one processing batch.
    pub fn classifications_for_batch(&self, batch_id: &str) -> Result<Vec<MessageClassification>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {CLASSIFICATION_COLS} FROM message_classifications
             WHERE batch_id = ?1 ORDER BY id"
        ))?;
        let rows = stmt.query_map([batch_id], row_to_classification)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    pub fn rag_context_for_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Option<RagContext>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT id, conversation_id, retrieved_docs_json, total_tokens, created_at
             FROM rag_contexts WHERE conversation_id = ?1
             ORDER BY id DESC LIMIT 1",
            [conversation_id],
            row_to_rag_context,
        ) {
            Ok(c) => Ok(Some(c?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Messages belonging to one conversation, oldest first.
    pub fn messages_for_conversation(&self, conversation_id: &str) -> Result<Vec<UnifiedMessage>> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {MESSAGE_COLS} FROM unified_messages
             WHERE conversation_id = ?1 ORDER BY timestamp, id"
        ))?;
        let rows = stmt.query_map([conversation_id], row_to_message)?;
        collect_messages(rows)
    }
}

pub(crate) const MESSAGE_COLS: &str = "id, tenant_id, stream_id, message_id, timestamp, author, \
     content, channel, raw_data, metadata_json, embedding_json, conversation_id, \
     processing_status, failure_count, last_error, created_at";

pub(crate) const CLASSIFICATION_COLS: &str = "id, message_id, batch_id, category, \
     doc_value_reason, suggested_doc_page, rag_search_criteria_json, model_used, created_at";

/// Map a row (selected with [`MESSAGE_COLS`]) to a `UnifiedMessage`.
///
/// Returns a nested result: the outer error is rusqlite's, the inner covers
/// JSON/timestamp decoding so corrupt rows surface as `StoreError::Corrupt`
/// instead of panicking.
pub(crate) fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<UnifiedMessage>> {
    let timestamp: String = row.get(4)?;
    let metadata_json: String = row.get(9)?;
    let embedding_json: Option<String> = row.get(10)?;
    let status_str: String = row.get(12)?;
    let created_at: String = row.get(15)?;

    Ok((|| {
        Ok(UnifiedMessage {
            id: row.get(0).map_err(StoreError::Database)?,
            tenant_id: row.get(1).map_err(StoreError::Database)?,
            stream_id: row.get(2).map_err(StoreError::Database)?,
            message_id: row.get(3).map_err(StoreError::Database)?,
            timestamp: parse_ts(&timestamp)?,
            author: row.get(5).map_err(StoreError::Database)?,
            content: row.get(6).map_err(StoreError::Database)?,
            channel: row.get(7).map_err(StoreError::Database)?,
            raw_data: row.get(8).map_err(StoreError::Database)?,
            metadata: serde_json::from_str(&metadata_json)?,
            embedding: embedding_json
                .map(|s| serde_json::from_str(&s))
                .transpose()?,
            conversation_id: row.get(11).map_err(StoreError::Database)?,
            processing_status: status_str
                .parse::<ProcessingStatus>()
                .map_err(StoreError::Corrupt)?,
            failure_count: row.get::<_, i64>(13).map_err(StoreError::Database)? as u32,
            last_error: row.get(14).map_err(StoreError::Database)?,
            created_at: parse_ts(&created_at)?,
        })
    })())
}

pub(crate) fn row_to_classification(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<Result<MessageClassification>> {
    let criteria_json: String = row.get(6)?;
    let created_at: String = row.get(8)?;
    Ok((|| {
        Ok(MessageClassification {
            id: row.get(0).map_err(StoreError::Database)?,
            message_id: row.get(1).map_err(StoreError::Database)?,
            batch_id: row.get(2).map_err(StoreError::Database)?,
            category: row.get(3).map_err(StoreError::Database)?,
            doc_value_reason: row.get(4).map_err(StoreError::Database)?,
            suggested_doc_page: row.get(5).map_err(StoreError::Database)?,
            rag_search_criteria: serde_json::from_str(&criteria_json)?,
            model_used: row.get(7).map_err(StoreError::Database)?,
            created_at: parse_ts(&created_at)?,
        })
    })())
}

fn row_to_rag_context(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<RagContext>> {
    let docs_json: String = row.get(2)?;
    let created_at: String = row.get(4)?;
    Ok((|| {
        Ok(RagContext {
            id: row.get(0).map_err(StoreError::Database)?,
            conversation_id: row.get(1).map_err(StoreError::Database)?,
            retrieved_docs: serde_json::from_str(&docs_json)?,
            total_tokens: row.get::<_, i64>(3).map_err(StoreError::Database)? as u32,
            created_at: parse_ts(&created_at)?,
        })
    })())
}

fn collect_messages(
    rows: impl Iterator<Item = rusqlite::Result<Result<UnifiedMessage>>>,
) -> Result<Vec<UnifiedMessage>> {
    let mut out = Vec::new();
    for r in rows {
        out.push(r??);
    }
    Ok(out)
}

/// Insert helpers used inside the batch-commit transaction. They operate on
/// a borrowed connection so the caller controls the transaction boundary.
pub(crate) fn insert_classification_tx(
    conn: &Connection,
    c: &crate::types::NewClassification,
) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO message_classifications
         (message_id, batch_id, category, doc_value_reason, suggested_doc_page,
          rag_search_criteria_json, model_used, created_at)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        rusqlite::params![
            c.message_id,
            c.batch_id,
            c.category,
            c.doc_value_reason,
            c.suggested_doc_page,
            serde_json::to_string(&c.rag_search_criteria)?,
            c.model_used,
            now_rfc3339(),
        ],
    )?;
    Ok(())
}

pub(crate) fn insert_rag_context_tx(
    conn: &Connection,
    r: &crate::types::NewRagContext,
) -> Result<()> {
    conn.execute(
        "INSERT INTO rag_contexts
         (conversation_id, retrieved_docs_json, total_tokens, created_at)
         VALUES (?1,?2,?3,?4)",
        rusqlite::params![
            r.conversation_id,
            serde_json::to_string(&r.retrieved_docs)?,
            r.total_tokens as i64,
            now_rfc3339(),
        ],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn msg(stream: &str, id: &str, ts: DateTime<Utc>) -> NewMessage {
        NewMessage {
            tenant_id: "t1".into(),
            stream_id: stream.into(),
            message_id: id.into(),
            timestamp: ts,
            author: "alice".into(),
            content: "how do I configure the rpc timeout?".into(),
            channel: Some("support".into()),
            raw_data: "{}".into(),
            metadata: serde_json::json!({"topic": "rpc"}),
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 2, h, m, 0).unwrap()
    }

    #[test]
    fn insert_is_idempotent() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.insert_message(&msg("s1", "m1", at(10, 0))).unwrap());
        assert!(!store.insert_message(&msg("s1", "m1", at(10, 0))).unwrap());
        assert_eq!(store.pending_count("s1").unwrap(), 1);
    }

    #[test]
    fn range_query_is_half_open() {
        let store = Store::open_in_memory().unwrap();
        store.insert_message(&msg("s1", "m1", at(9, 59))).unwrap();
        store.insert_message(&msg("s1", "m2", at(10, 0))).unwrap();
        store.insert_message(&msg("s1", "m3", at(10, 30))).unwrap();
        store.insert_message(&msg("s1", "m4", at(11, 0))).unwrap();

        let got = store
            .messages_in_range("s1", &at(10, 0), &at(11, 0))
            .unwrap();
        let ids: Vec<_> = got.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["m2", "m3"]);
    }

    #[test]
    fn pending_streams_respects_cutoff() {
        let store = Store::open_in_memory().unwrap();
        store.insert_message(&msg("old", "m1", at(1, 0))).unwrap();
        store.insert_message(&msg("new", "m2", at(12, 0))).unwrap();

        let streams = store.next_pending_streams(&at(6, 0)).unwrap();
        assert_eq!(streams, vec!["old".to_string()]);
    }

    #[test]
    fn failure_budget_marks_failed() {
        let store = Store::open_in_memory().unwrap();
        store.insert_message(&msg("s1", "m1", at(10, 0))).unwrap();
        let m = store
            .messages_in_range("s1", &at(9, 0), &at(11, 0))
            .unwrap()
            .remove(0);

        for _ in 0..5 {
            store.bump_failure_counts(&[m.id], "llm exhausted").unwrap();
        }
        assert_eq!(store.mark_failed_messages(5).unwrap(), 1);

        let m = store.get_message(m.id).unwrap().unwrap();
        assert_eq!(m.processing_status, ProcessingStatus::Failed);
        assert_eq!(m.failure_count, 5);
        assert_eq!(m.last_error.as_deref(), Some("llm exhausted"));
    }

    #[test]
    fn embedding_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.insert_message(&msg("s1", "m1", at(10, 0))).unwrap();

        store.set_message_embedding(1, &[0.25, -0.5, 1.0]).unwrap();
        let m = store.get_message(1).unwrap().unwrap();
        assert_eq!(m.embedding, Some(vec![0.25, -0.5, 1.0]));

        assert!(store.set_message_embedding(999, &[1.0]).is_err());
    }

    #[test]
    fn metadata_accessors() {
        let store = Store::open_in_memory().unwrap();
        let mut m = msg("s1", "m1", at(10, 0));
        m.metadata = serde_json::json!({
            "topic": "rpc", "reply_to_message_id": "m0", "chat_id": "42"
        });
        store.insert_message(&m).unwrap();

        let got = store
            .messages_in_range("s1", &at(9, 0), &at(11, 0))
            .unwrap()
            .remove(0);
        assert_eq!(got.topic(), Some("rpc"));
        assert_eq!(got.reply_to_message_id(), Some("m0"));
        assert_eq!(got.meta_str("chat_id"), Some("42"));
        assert_eq!(got.thread_id(), None);
    }
}
