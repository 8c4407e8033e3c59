//! Stream configuration rows and tenant rulesets.

use std::str::FromStr;

use docsmith_core::types::AdapterType;

use crate::error::{Result, StoreError};
use crate::types::StreamConfig;
use crate::{now_rfc3339, parse_ts, Store};

impl Store {
    /// Register or update a stream source. `(tenant, stream)` is the key.
    pub fn upsert_stream_config(
        &self,
        tenant_id: &str,
        stream_id: &str,
        adapter_type: AdapterType,
        config_json: &serde_json::Value,
        enabled: bool,
        schedule: Option<&str>,
    ) -> Result<StreamConfig> {
        {
            let db = self.db.lock().unwrap();
            let now = now_rfc3339();
            db.execute(
                "INSERT INTO stream_configs
                 (tenant_id, stream_id, adapter_type, config_json, enabled, schedule,
                  created_at, updated_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?7)
                 ON CONFLICT(tenant_id, stream_id) DO UPDATE SET
                   adapter_type    = excluded.adapter_type,
                   config_json     = excluded.config_json,
                   enabled         = excluded.enabled,
                   schedule        = excluded.schedule,
                   disabled_reason = NULL,
                   updated_at      = excluded.updated_at",
                rusqlite::params![
                    tenant_id,
                    stream_id,
                    adapter_type.to_string(),
                    serde_json::to_string(config_json)?,
                    enabled,
                    schedule,
                    now,
                ],
            )?;
        }
        self.get_stream_config(tenant_id, stream_id)?
            .ok_or_else(|| StoreError::NotFound {
                what: format!("stream config {stream_id}"),
            })
    }

    pub fn get_stream_config(
        &self,
        tenant_id: &str,
        stream_id: &str,
    ) -> Result<Option<StreamConfig>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            &format!(
                "SELECT {STREAM_COLS} FROM stream_configs
                 WHERE tenant_id = ?1 AND stream_id = ?2"
            ),
            rusqlite::params![tenant_id, stream_id],
            row_to_stream_config,
        ) {
            Ok(c) => Ok(Some(c?)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    pub fn list_stream_configs(&self, enabled_only: bool) -> Result<Vec<StreamConfig>> {
        let db = self.db.lock().unwrap();
        let filter = if enabled_only { "WHERE enabled = 1" } else { "" };
        let mut stmt = db.prepare(&format!(
            "SELECT {STREAM_COLS} FROM stream_configs {filter} ORDER BY stream_id"
        ))?;
        let rows = stmt.query_map([], row_to_stream_config)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r??);
        }
        Ok(out)
    }

    /// Disable a stream after repeated failed runs, recording why.
    pub fn disable_stream(&self, tenant_id: &str, stream_id: &str, reason: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        let n = db.execute(
            "UPDATE stream_configs
             SET enabled = 0, disabled_reason = ?3, updated_at = ?4
             WHERE tenant_id = ?1 AND stream_id = ?2",
            rusqlite::params![tenant_id, stream_id, reason, now_rfc3339()],
        )?;
        if n == 0 {
            return Err(StoreError::NotFound {
                what: format!("stream config {stream_id}"),
            });
        }
        Ok(())
    }

    /// The tenant's current ruleset markdown, if any has been saved.
    pub fn get_ruleset(&self, tenant_id: &str) -> Result<Option<String>> {
        let db = self.db.lock().unwrap();
        match db.query_row(
            "SELECT content_markdown FROM tenant_rulesets WHERE tenant_id = ?1",
            [tenant_id],
            |row| row.get::<_, String>(0),
        ) {
            Ok(s) => Ok(Some(s)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(StoreError::Database(e)),
        }
    }

    /// Replace the tenant's ruleset. No in-core versioning — one current row.
    pub fn put_ruleset(&self, tenant_id: &str, content_markdown: &str) -> Result<()> {
        let db = self.db.lock().unwrap();
        db.execute(
            "INSERT INTO tenant_rulesets (tenant_id, content_markdown, updated_at)
             VALUES (?1,?2,?3)
             ON CONFLICT(tenant_id) DO UPDATE SET
               content_markdown = excluded.content_markdown,
               updated_at       = excluded.updated_at",
            rusqlite::params![tenant_id, content_markdown, now_rfc3339()],
        )?;
        Ok(())
    }
}

const STREAM_COLS: &str = "id, tenant_id, stream_id, adapter_type, config_json, enabled, \
     schedule, disabled_reason, created_at, updated_at";

fn row_to_stream_config(row: &rusqlite::Row<'_>) -> rusqlite::Result<Result<StreamConfig>> {
    let adapter: String = row.get(3)?;
    let config_json: String = row.get(4)?;
    let created_at: String = row.get(8)?;
    let updated_at: String = row.get(9)?;
    Ok((|| {
        Ok(StreamConfig {
            id: row.get(0).map_err(StoreError::Database)?,
            tenant_id: row.get(1).map_err(StoreError::Database)?,
            stream_id: row.get(2).map_err(StoreError::Database)?,
            adapter_type: AdapterType::from_str(&adapter).map_err(StoreError::Corrupt)?,
            config_json: serde_json::from_str(&config_json)?,
            enabled: row.get(5).map_err(StoreError::Database)?,
            schedule: row.get(6).map_err(StoreError::Database)?,
            disabled_reason: row.get(7).map_err(StoreError::Database)?,
            created_at: parse_ts(&created_at)?,
            updated_at: parse_ts(&updated_at)?,
        })
    })())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upsert_and_disable() {
        let store = Store::open_in_memory().unwrap();
        let cfg = store
            .upsert_stream_config(
                "t1",
                "support-chat",
                AdapterType::BotChat,
                &serde_json::json!({"bot_token": "x"}),
                true,
                Some("interval:300"),
            )
            .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.adapter_type, AdapterType::BotChat);

        store
            .disable_stream("t1", "support-chat", "5 consecutive failures")
            .unwrap();
        let cfg = store.get_stream_config("t1", "support-chat").unwrap().unwrap();
        assert!(!cfg.enabled);
        assert_eq!(
            cfg.disabled_reason.as_deref(),
            Some("5 consecutive failures")
        );

        // Re-registering clears the disable reason.
        let cfg = store
            .upsert_stream_config(
                "t1",
                "support-chat",
                AdapterType::BotChat,
                &serde_json::json!({"bot_token": "x"}),
                true,
                None,
            )
            .unwrap();
        assert!(cfg.enabled);
        assert_eq!(cfg.disabled_reason, None);
    }

    #[test]
    fn ruleset_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.get_ruleset("t1").unwrap().is_none());
        store.put_ruleset("t1", "# PROMPT_CONTEXT\nbe brief").unwrap();
        store.put_ruleset("t1", "# PROMPT_CONTEXT\nbe precise").unwrap();
        assert_eq!(
            store.get_ruleset("t1").unwrap().unwrap(),
            "# PROMPT_CONTEXT\nbe precise"
        );
    }
}
