//! Pollable chat-API adapter.
//!
//! Enumerates configured channels (and their topics, for forum-style
//! sources), then pages through new messages per resource using the
//! provider's monotonic message id as the cursor. The topic travels in
//! `metadata.topic` so conversation grouping can split on it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info};

use docsmith_core::types::AdapterType;
use docsmith_store::types::NewMessage;

use crate::adapter::{AdapterContext, StreamAdapter};
use crate::error::{Result, StreamError};

const PAGE_LIMIT: u32 = 200;

#[derive(Debug, Clone, Deserialize)]
pub struct ChatApiConfig {
    pub base_url: String,
    pub api_token: String,
    /// Channel names to poll.
    pub channels: Vec<String>,
    /// Enumerate forum topics per channel and poll each separately.
    #[serde(default)]
    pub enumerate_topics: bool,
}

pub struct ChatApiAdapter {
    config: ChatApiConfig,
    run_lock: tokio::sync::Mutex<()>,
}

/// Wire shape of one provider message.
#[derive(Debug, Clone, serde::Serialize, Deserialize)]
pub(crate) struct ApiMessage {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub author: String,
    pub text: String,
    #[serde(default)]
    pub reply_to_id: Option<u64>,
    #[serde(default)]
    pub thread_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MessagesPage {
    messages: Vec<ApiMessage>,
}

#[derive(Debug, Deserialize)]
struct TopicsResponse {
    topics: Vec<Topic>,
}

#[derive(Debug, Clone, Deserialize)]
struct Topic {
    id: String,
    name: String,
}

impl ChatApiAdapter {
    pub fn from_config(config: &serde_json::Value) -> Result<Self> {
        let config: ChatApiConfig = serde_json::from_value(config.clone())
            .map_err(|e| StreamError::Config(format!("pollable-chat: {e}")))?;
        if config.channels.is_empty() {
            return Err(StreamError::Config(
                "pollable-chat: at least one channel is required".to_string(),
            ));
        }
        if !config.base_url.starts_with("http") {
            return Err(StreamError::Config(format!(
                "pollable-chat: bad base_url '{}'",
                config.base_url
            )));
        }
        Ok(Self {
            config,
            run_lock: tokio::sync::Mutex::new(()),
        })
    }

    async fn fetch_topics(&self, ctx: &AdapterContext, channel: &str) -> Result<Vec<Topic>> {
        let url = format!("{}/api/channels/{channel}/topics", self.config.base_url);
        let resp = ctx
            .client
            .get(&url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(StreamError::Api {
                status,
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let topics: TopicsResponse = resp
            .json()
            .await
            .map_err(|e| StreamError::Parse(e.to_string()))?;
        Ok(topics.topics)
    }

    async fn fetch_page(
        &self,
        ctx: &AdapterContext,
        channel: &str,
        topic: Option<&str>,
        after_id: u64,
    ) -> Result<Vec<ApiMessage>> {
        let mut url = format!(
            "{}/api/channels/{channel}/messages?after_id={after_id}&limit={PAGE_LIMIT}",
            self.config.base_url
        );
        if let Some(topic) = topic {
            url.push_str(&format!("&topic={topic}"));
        }
        let resp = ctx
            .client
            .get(&url)
            .bearer_auth(&self.config.api_token)
            .send()
            .await?;
        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            return Err(StreamError::Api {
                status,
                message: resp.text().await.unwrap_or_default(),
            });
        }
        let page: MessagesPage = resp
            .json()
            .await
            .map_err(|e| StreamError::Parse(e.to_string()))?;
        Ok(page.messages)
    }

    /// Drain one `(channel, topic)` resource from its watermark forward.
    async fn import_resource(
        &self,
        ctx: &AdapterContext,
        channel: &str,
        topic: Option<&Topic>,
    ) -> Result<u64> {
        let resource_id = match topic {
            Some(t) => format!("{channel}/{}", t.id),
            None => channel.to_string(),
        };

        let mut cursor: u64 = ctx
            .store
            .get_import_watermark(&ctx.stream_id, &resource_id)?
            .and_then(|w| w.last_imported_id)
            .and_then(|id| id.parse().ok())
            .unwrap_or(0);

        let mut imported = 0u64;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            let page = self
                .fetch_page(ctx, channel, topic.map(|t| t.id.as_str()), cursor)
                .await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();

            let mut max_id = cursor;
            let mut max_time: Option<DateTime<Utc>> = None;
            for msg in page {
                let new = normalise_message(ctx, channel, topic.map(|t| t.name.as_str()), &msg)?;
                if ctx.store.insert_message(&new)? {
                    imported += 1;
                }
                max_id = max_id.max(msg.id);
                max_time = Some(max_time.map_or(msg.timestamp, |t: DateTime<Utc>| t.max(msg.timestamp)));
            }

            if let Some(max_time) = max_time {
                ctx.store.advance_import_watermark(
                    &ctx.stream_id,
                    &resource_id,
                    &max_time,
                    Some(&max_id.to_string()),
                    false,
                )?;
            }
            cursor = max_id;

            if page_len < PAGE_LIMIT as usize {
                break;
            }
        }
        debug!(stream_id = %ctx.stream_id, resource = %resource_id, imported, "resource drained");
        Ok(imported)
    }
}

/// Normalise one provider message into the unified shape.
pub(crate) fn normalise_message(
    ctx: &AdapterContext,
    channel: &str,
    topic: Option<&str>,
    msg: &ApiMessage,
) -> Result<NewMessage> {
    let mut metadata = serde_json::Map::new();
    if let Some(topic) = topic {
        metadata.insert("topic".to_string(), topic.into());
    }
    if let Some(reply) = msg.reply_to_id {
        metadata.insert("reply_to_message_id".to_string(), reply.to_string().into());
    }
    if let Some(thread) = &msg.thread_id {
        metadata.insert("thread_id".to_string(), thread.as_str().into());
    }

    Ok(NewMessage {
        tenant_id: ctx.tenant_id.clone(),
        stream_id: ctx.stream_id.clone(),
        message_id: msg.id.to_string(),
        timestamp: msg.timestamp,
        author: msg.author.clone(),
        content: msg.text.clone(),
        channel: Some(channel.to_string()),
        raw_data: serde_json::to_string(msg).unwrap_or_default(),
        metadata: serde_json::Value::Object(metadata),
    })
}

#[async_trait]
impl StreamAdapter for ChatApiAdapter {
    fn adapter_type(&self) -> AdapterType {
        AdapterType::PollableChat
    }

    async fn run(&self, ctx: &AdapterContext) -> Result<u64> {
        let _guard = self.run_lock.lock().await;

        let mut imported = 0u64;
        for channel in &self.config.channels {
            if self.config.enumerate_topics {
                let topics = self.fetch_topics(ctx, channel).await?;
                for topic in &topics {
                    imported += self.import_resource(ctx, channel, Some(topic)).await?;
                }
            } else {
                imported += self.import_resource(ctx, channel, None).await?;
            }
        }
        info!(stream_id = %ctx.stream_id, imported, "chat api poll complete");
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
            stream_id: "forum".into(),
            client: reqwest::Client::new(),
            cancel: CancellationToken::new(),
        }
    }

    #[test]
    fn config_requires_channels() {
        assert!(ChatApiAdapter::from_config(&serde_json::json!({
            "base_url": "https://chat.example.com",
            "api_token": "t",
            "channels": []
        }))
        .is_err());
    }

    #[test]
    fn normalisation_carries_topic_and_reply() {
        let ctx = ctx();
        let msg = ApiMessage {
            id: 1042,
            timestamp: Utc::now(),
            author: "alice".into(),
            text: "try rpc_timeout=30s".into(),
            reply_to_id: Some(1040),
            thread_id: None,
        };
        let new = normalise_message(&ctx, "support", Some("networking"), &msg).unwrap();
        assert_eq!(new.message_id, "1042");
        assert_eq!(new.channel.as_deref(), Some("support"));
        assert_eq!(new.metadata["topic"], "networking");
        assert_eq!(new.metadata["reply_to_message_id"], "1040");
    }
}
