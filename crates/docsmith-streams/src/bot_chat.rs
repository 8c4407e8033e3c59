//! Bot-delivered chat adapter.
//!
//! Speaks the bot HTTP API directly: `run` long-polls `getUpdates` with the
//! next offset derived from stored watermarks, which keeps the import cursor
//! durable and under adapter control. Webhook delivery feeds the same
//! normaliser through [`BotChatAdapter::ingest_update`], so both modes share
//! dedup and watermark semantics. Long-poll is the local/dev default.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use docsmith_core::types::AdapterType;
use docsmith_store::types::NewMessage;

use crate::adapter::{AdapterContext, StreamAdapter};
use crate::error::{Result, StreamError};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";

#[derive(Debug, Clone, Deserialize)]
pub struct BotChatConfig {
    pub bot_token: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,
    /// Long-poll wait in seconds for `getUpdates` (0 = return immediately).
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_secs: u32,
    /// When set, updates from other chats are dropped.
    #[serde(default)]
    pub allowed_chat_ids: Vec<i64>,
}

fn default_api_base() -> String {
    DEFAULT_API_BASE.to_string()
}
fn default_poll_timeout() -> u32 {
    25
}

pub struct BotChatAdapter {
    config: BotChatConfig,
    run_lock: tokio::sync::Mutex<()>,
}

// Bot API wire types (private — only what the normaliser needs).

#[derive(Debug, Deserialize)]
struct UpdatesResponse {
    ok: bool,
    #[serde(default)]
    result: Vec<Update>,
    #[serde(default)]
    description: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Update {
    pub update_id: i64,
    #[serde(default)]
    pub message: Option<BotMessage>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BotMessage {
    pub message_id: i64,
    /// Unix epoch seconds.
    pub date: i64,
    pub chat: Chat,
    #[serde(default)]
    pub from: Option<User>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub reply_to_message: Option<ReplyRef>,
    /// Forum-topic thread id — participates in conversation grouping.
    #[serde(default)]
    pub message_thread_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Chat {
    pub id: i64,
    #[serde(default)]
    pub title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct User {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub first_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ReplyRef {
    pub message_id: i64,
}

impl BotChatAdapter {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: BotChatConfig = serde_json::from_value(config.clone())
            .map_err(|e| StreamError::Config(format!("bot-chat: {e}")))?;
        if config.bot_token.trim().is_empty() {
            return Err(StreamError::Config(
                "bot-chat: bot_token must not be empty".to_string(),
            ));
        }
        Ok(Self {
            config,
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    /// The `getUpdates` offset: one past the largest update id any chat of
    /// this stream has seen.
    fn next_offset(&self, ctx: &AdapterContext) -> Result<i64> {
        let max_seen = ctx
            .store
            .import_watermarks_for_stream(&ctx.stream_id)?
            .into_iter()
            .filter_map(|w| w.last_imported_id.and_then(|id| id.parse::<i64>().ok()))
            .max();
        Ok(max_seen.map(|id| id + 1).unwrap_or(0))
    }

    async fn fetch_updates(&self, ctx: &AdapterContext, offset: i64) -> Result<Vec<Update>> {
        let url = format!(
            "{}/bot{}/getUpdates?offset={offset}&timeout={}",
            self.config.api_base, self.config.bot_token, self.config.poll_timeout_secs
        );
        let resp = ctx.client.get(&url).send().await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(StreamError::Api {
                status,
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let body: UpdatesResponse = resp
            .json()
            .await
            .map_err(|e| StreamError::Parse(e.to_string()))?;
        if !body.ok {
            return Err(StreamError::Api {
                status,
                message: body.description.unwrap_or_else(|| "bot API returned ok=false".into()),
            });
        }
        Ok(body.result)
    }

    /// Normalise and store one update. Shared by long-poll and webhook
    /// delivery. Returns whether a new message row was written.
    pub fn ingest_update(&self, ctx: &AdapterContext, update: &serde_json::Value) -> Result<bool> {
        let update: Update = serde_json::from_value(update.clone())
            .map_err(|e| StreamError::Parse(format!("bad update payload: {e}")))?;
        self.store_update(ctx, &update)
    }

    fn store_update(&self, ctx: &AdapterContext, update: &Update) -> Result<bool> {
        let Some(msg) = &update.message else {
            // Non-message updates (edits, reactions) advance nothing.
            return Ok(false);
        };
        let Some(text) = msg.text.as_deref().filter(|t| !t.is_empty()) else {
            return Ok(false);
        };
        if !self.config.allowed_chat_ids.is_empty()
            && !self.config.allowed_chat_ids.contains(&msg.chat.id)
        {
            debug!(chat_id = msg.chat.id, "update from disallowed chat dropped");
            return Ok(false);
        }

        let timestamp = Utc
            .timestamp_opt(msg.date, 0)
            .single()
            .ok_or_else(|| StreamError::Parse(format!("bad message date: {}", msg.date)))?;

        let author = msg
            .from
            .as_ref()
            .and_then(|u| u.username.clone().or_else(|| u.first_name.clone()))
            .unwrap_or_else(|| "unknown".to_string());

        let mut metadata = serde_json::Map::new();
        metadata.insert("chat_id".to_string(), msg.chat.id.to_string().into());
        if let Some(thread) = msg.message_thread_id {
            metadata.insert("topic".to_string(), thread.to_string().into());
            metadata.insert("thread_id".to_string(), thread.to_string().into());
        }
        if let Some(reply) = &msg.reply_to_message {
            metadata.insert(
                "reply_to_message_id".to_string(),
                format!("{}:{}", msg.chat.id, reply.message_id).into(),
            );
        }

        let inserted = ctx.store.insert_message(&NewMessage {
            tenant_id: ctx.tenant_id.clone(),
            stream_id: ctx.stream_id.clone(),
            message_id: format!("{}:{}", msg.chat.id, msg.message_id),
            timestamp,
            author,
            content: text.to_string(),
            channel: Some(
                msg.chat
                    .title
                    .clone()
                    .unwrap_or_else(|| msg.chat.id.to_string()),
            ),
            raw_data: serde_json::json!({"update_id": update.update_id}).to_string(),
            metadata: serde_json::Value::Object(metadata),
        })?;

        ctx.store.advance_import_watermark(
            &ctx.stream_id,
            &msg.chat.id.to_string(),
            &timestamp,
            Some(&update.update_id.to_string()),
            false,
        )?;

        Ok(inserted)
    }
}

#[async_trait]
impl StreamAdapter for BotChatAdapter {
    fn adapter_type(&self) -> AdapterType {
        AdapterType::BotChat
    }

    async fn ingest_push(&self, ctx: &AdapterContext, payload: &serde_json::Value) -> Result<bool> {
        self.ingest_update(ctx, payload)
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<u64> {
        let _guard = self.run_lock.lock().await;

        let mut imported = 0u64;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            let offset = self.next_offset(ctx)?;
            let updates = self.fetch_updates(ctx, offset).await?;
            if updates.is_empty() {
                break;
            }
            for update in &updates {
                match self.store_update(ctx, update) {
                    Ok(true) => imported += 1,
                    Ok(false) => {}
                    Err(e) => warn!(update_id = update.update_id, error = %e, "update dropped"),
                }
            }
        }
        info!(stream_id = %ctx.stream_id, imported, "bot poll complete");
        Ok(imported)
    }

    async fn shutdown(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsmith_store::Store;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn ctx() -> AdapterContext {
        AdapterContext {
            store: Arc::new(Store::open_in_memory().unwrap()),
            tenant_id: "t1".into(),
            stream_id: "bot".into(),
            client: reqwest::Client::new(),
            cancel: CancellationToken::new(),
        }
    }

    fn adapter() -> BotChatAdapter {
        BotChatAdapter::from_config(&serde_json::json!({"bot_token": "123:abc"})).unwrap()
    }

    fn update(update_id: i64, chat_id: i64, message_id: i64, text: &str) -> serde_json::Value {
        serde_json::json!({
            "update_id": update_id,
            "message": {
                "message_id": message_id,
                "date": 1759399200,
                "chat": {"id": chat_id, "title": "Support"},
                "from": {"username": "alice"},
                "text": text,
            }
        })
    }

    #[test]
    fn ingest_normalises_and_advances_watermark() {
        let ctx = ctx();
        let a = adapter();

        assert!(a.ingest_update(&ctx, &update(500, 42, 7, "rpc timeout?")).unwrap());
        // Same update again — deduplicated by (stream_id, message_id).
        assert!(!a.ingest_update(&ctx, &update(500, 42, 7, "rpc timeout?")).unwrap());

        let wm = ctx.store.get_import_watermark("bot", "42").unwrap().unwrap();
        assert_eq!(wm.last_imported_id.as_deref(), Some("500"));

        let msgs = ctx
            .store
            .messages_in_range(
                "bot",
                &Utc.timestamp_opt(0, 0).single().unwrap(),
                &Utc::now(),
            )
            .unwrap();
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].message_id, "42:7");
        assert_eq!(msgs[0].meta_str("chat_id"), Some("42"));
        assert_eq!(msgs[0].channel.as_deref(), Some("Support"));
    }

    #[test]
    fn forum_topic_lands_in_metadata() {
        let ctx = ctx();
        let a = adapter();
        let mut u = update(501, 42, 8, "see pinned message");
        u["message"]["message_thread_id"] = serde_json::json!(99);
        u["message"]["reply_to_message"] = serde_json::json!({"message_id": 7});

        a.ingest_update(&ctx, &u).unwrap();
        let msgs = ctx
            .store
            .messages_in_range(
                "bot",
                &Utc.timestamp_opt(0, 0).single().unwrap(),
                &Utc::now(),
            )
            .unwrap();
        assert_eq!(msgs[0].topic(), Some("99"));
        assert_eq!(msgs[0].reply_to_message_id(), Some("42:7"));
    }

    #[test]
    fn disallowed_chat_is_dropped() {
        let ctx = ctx();
        let a = BotChatAdapter::from_config(&serde_json::json!({
            "bot_token": "123:abc",
            "allowed_chat_ids": [1]
        }))
        .unwrap();
        assert!(!a.ingest_update(&ctx, &update(1, 42, 7, "hi")).unwrap());
    }

    #[test]
    fn next_offset_is_max_update_id_plus_one() {
        let ctx = ctx();
        let a = adapter();
        a.ingest_update(&ctx, &update(500, 42, 7, "one")).unwrap();
        a.ingest_update(&ctx, &update(510, 43, 3, "two")).unwrap();
        assert_eq!(a.next_offset(&ctx).unwrap(), 511);
    }

    #[test]
    fn non_message_updates_are_ignored() {
        let ctx = ctx();
        let a = adapter();
        assert!(!a
            .ingest_update(&ctx, &serde_json::json!({"update_id": 5}))
            .unwrap());
    }
}
