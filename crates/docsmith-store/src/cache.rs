//! LLM response cache and doc-index cache.
//!
//! The LLM cache is content-addressed: `hash = sha256(model ‖ purpose ‖
//! canonical prompt)`, computed by the gateway. Writers upsert by hash;
//! last-write-wins is fine for identical content.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::{Result, StoreError};
use crate::types::{CachePurpose, DocIndexCacheEntry, LlmCacheEntry};
use crate::{now_rfc3339, parse_ts, Store};

/// Search result group: one message and every cache entry recorded for it.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSearchGroup {
    /// `None` groups entries that were cached without a message id.
    pub message_id: Option<i64>,
    pub entries: Vec<LlmCacheEntry>,
}

impl Store {
    pub fn cache_get(&self, hash: &str) -> Result<Option<LlmCacheEntry>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!("SELECT {CACHE_COLS} FROM llm_cache WHERE hash = ?1"),
            [hash],
            row_to_cache_entry,
        ) {
            Ok(e) => Ok(Some(e?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn cache_put(&self, entry: &LlmCacheEntry) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO llm_cache
             (hash, purpose, prompt, response, model, tokens_used, timestamp, message_id)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)
             ON CONFLICT(hash) DO UPDATE SET
               response    = excluded.response,
               tokens_used = excluded.tokens_used,
               timestamp   = excluded.timestamp,
               message_id  = COALESCE(excluded.message_id, llm_cache.message_id)",
            rusqlite::params![
                entry.hash,
                entry.purpose.to_string(),
                entry.prompt,
                entry.response,
                entry.model,
                entry.tokens_used as i64,
                now_rfc3339(),
                entry.message_id,
            ],
        )?;
        Ok(())
    }

    /// Search-with-related: text-match over prompt and response, then expand
    /// to *all* entries of every message that had a hit, grouped by message.
    /// Entries without a message id are returned individually.
    pub fn cache_search(&self, query: &str, limit: usize) -> Result<Vec<CacheSearchGroup>> {
        let pattern = format!("%{}%", query.replace('%', "\\%").replace('_', "\\_"));

        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(&format!(
            "SELECT {CACHE_COLS} FROM llm_cache
             WHERE prompt LIKE ?1 ESCAPE '\\' OR response LIKE ?1 ESCAPE '\\'
             ORDER BY timestamp DESC LIMIT ?2"
        ))?;
        let rows = stmt.query_map(
            rusqlite::params![pattern, limit as i64],
            row_to_cache_entry,
        )?;
        let mut direct_hits = Vec::new();
        for r in rows {
            direct_hits.push(r??);
        }

        // Expand: a hit on any entry for a message pulls in that message's
        // full call history.
        let mut groups: BTreeMap<Option<i64>, Vec<LlmCacheEntry>> = BTreeMap::new();
        let mut expand_stmt = db.prepare(&format!(
            "SELECT {CACHE_COLS} FROM llm_cache WHERE message_id = ?1 ORDER BY timestamp"
        ))?;
        for hit in direct_hits {
            match hit.message_id {
                Some(mid) => {
                    if groups.contains_key(&Some(mid)) {
                        continue;
                    }
                    let rows = expand_stmt.query_map([mid], row_to_cache_entry)?;
                    let mut entries = Vec::new();
                    for r in rows {
                        entries.push(r??);
                    }
                    groups.insert(Some(mid), entries);
                }
                None => groups.entry(None).or_default().push(hit),
            }
        }

        Ok(groups
            .into_iter()
            .map(|(message_id, entries)| CacheSearchGroup {
                message_id,
                entries,
            })
            .collect())
    }

    pub fn docindex_cache_get(
        &self,
        commit_hash: &str,
        config_hash: &str,
    ) -> Result<Option<DocIndexCacheEntry>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT commit_hash, config_hash, index_data_json, compact_index_text, generated_at
             FROM doc_index_cache WHERE commit_hash = ?1 AND config_hash = ?2",
            rusqlite::params![commit_hash, config_hash],
            row_to_docindex_entry,
        ) {
            Ok(e) => Ok(Some(e?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn docindex_cache_put(&self, entry: &DocIndexCacheEntry) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO doc_index_cache
             (commit_hash, config_hash, index_data_json, compact_index_text, generated_at)
             VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(commit_hash, config_hash) DO UPDATE SET
               index_data_json    = excluded.index_data_json,
               compact_index_text = excluded.compact_index_text,
               generated_at       = excluded.generated_at",
            rusqlite::params![
                entry.commit_hash,
                entry.config_hash,
                serde_json::to_string(&entry.index_data)?,
                entry.compact_index_text,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Drop cached indexes for other commits — called on explicit doc sync.
    pub fn docindex_cache_invalidate_except(&self, commit_hash: &str) -> Result<usize> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "DELETE FROM doc_index_cache WHERE commit_hash != ?1",
            [commit_hash],
        )?;
        Ok(n)
    }
}

const CACHE_COLS: &str =
    "hash, purpose, prompt, response, model, tokens_used, timestamp, message_id";

fn row_to_cache_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<LlmCacheEntry>> {
    let purpose: String = row.get(1)?;
    let timestamp: String = row.get(6)?;
    Ok((|| {
        Ok(LlmCacheEntry {
            hash: row.get(0).map_err(StoreError::Database)?,
            purpose: purpose
                .parse::<CachePurpose>()
                .map_err(StoreError::Corrupt)?,
            prompt: row.get(2).map_err(StoreError::Database)?,
            response: row.get(3).map_err(StoreError::Database)?,
            model: row.get(4).map_err(StoreError::Database)?,
            tokens_used: row.get::<_, i64>(5).map_err(StoreError::Database)? as u32,
            timestamp: parse_ts(&timestamp)?,
            message_id: row.get(7).map_err(StoreError::Database)?,
        })
    })())
}

fn row_to_docindex_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<DocIndexCacheEntry>> {
    let data_json: String = row.get(2)?;
    let generated_at: String = row.get(4)?;
    Ok((|| {
        Ok(DocIndexCacheEntry {
            commit_hash: row.get(0).map_err(StoreError::Database)?,
            config_hash: row.get(1).map_err(StoreError::Database)?,
            index_data: serde_json::from_str(&data_json)?,
            compact_index_text: row.get(3).map_err(StoreError::Database)?,
            generated_at: parse_ts(&generated_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(hash: &str, prompt: &str, message_id: Option<i64>) -> LlmCacheEntry {
        LlmCacheEntry {
            hash: hash.into(),
            purpose: CachePurpose::Analysis,
            prompt: prompt.into(),
            response: "{}".into(),
            model: "claude-haiku-4-5".into(),
            tokens_used: 10,
            timestamp: Utc::now(),
            message_id,
        }
    }

    #[test]
    fn put_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        store.cache_put(&entry("h1", "classify this", None)).unwrap();
        let got = store.cache_get("h1").unwrap().unwrap();
        assert_eq!(got.prompt, "classify this");
        assert_eq!(got.purpose, CachePurpose::Analysis);
        assert!(store.cache_get("missing").unwrap().is_none());
    }

    #[test]
    fn upsert_by_hash_is_last_write_wins() {
        let store = Store::open_in_memory().unwrap();
        store.cache_put(&entry("h1", "p", None)).unwrap();
        let mut e2 = entry("h1", "p", Some(7));
        e2.response = "updated".into();
        store.cache_put(&e2).unwrap();

        let got = store.cache_get("h1").unwrap().unwrap();
        assert_eq!(got.response, "updated");
        assert_eq!(got.message_id, Some(7));
    }

    #[test]
    fn search_groups_by_message_and_expands() {
        let store = Store::open_in_memory().unwrap();
        store
            .cache_put(&entry("h1", "classify rpc timeout question", Some(1)))
            .unwrap();
        store
            .cache_put(&entry("h2", "generate proposal for conversation", Some(1)))
            .unwrap();
        store.cache_put(&entry("h3", "unrelated embedding", Some(2))).unwrap();

        let groups = store.cache_search("rpc timeout", 50).unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].message_id, Some(1));
        // The non-matching generate call comes along because message 1 matched.
        assert_eq!(groups[0].entries.len(), 2);
    }

    #[test]
    fn docindex_cache_keyed_by_commit_and_config() {
        let store = Store::open_in_memory().unwrap();
        let e = DocIndexCacheEntry {
            commit_hash: "abc".into(),
            config_hash: "cfg1".into(),
            index_data: serde_json::json!({"pages": []}),
            compact_index_text: "## docs".into(),
            generated_at: Utc::now(),
        };
        store.docindex_cache_put(&e).unwrap();

        assert!(store.docindex_cache_get("abc", "cfg1").unwrap().is_some());
        assert!(store.docindex_cache_get("abc", "cfg2").unwrap().is_none());
        assert!(store.docindex_cache_get("def", "cfg1").unwrap().is_none());

        assert_eq!(store.docindex_cache_invalidate_except("def").unwrap(), 1);
        assert!(store.docindex_cache_get("abc", "cfg1").unwrap().is_none());
    }
}
