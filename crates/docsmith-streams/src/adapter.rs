use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use docsmith_core::types::AdapterType;
use docsmith_store::Store;

use crate::bot_chat::BotChatAdapter;
use crate::chat_api::ChatApiAdapter;
use crate::error::Result;
use crate::file_drop::FileDropAdapter;

/// Everything an adapter run needs from the host process.
#[derive(Clone)]
pub struct AdapterContext {
    pub store: Arc<Store>,
    pub tenant_id: String,
    pub stream_id: String,
    /// Shared outbound client — carries the IPv4 preference and fetch deadline.
    pub client: reqwest::Client,
    pub cancel: CancellationToken,
}

/// Common interface for all stream adapters.
///
/// Construction is the `Initialize` step: `build_adapter` fails with
/// `E_CONFIG` on a bad config shape. Implementations serialise their own
/// runs with an internal lock, so overlapping scheduler triggers are safe.
#[async_trait]
pub trait StreamAdapter: Send + Sync {
    fn adapter_type(&self) -> AdapterType;

    /// One pull pass. Returns the number of newly imported messages.
    async fn run(&self, ctx: &AdapterContext) -> Result<u64>;

    /// Push delivery (webhook receive). Returns whether a new message row
    /// was written. Pull-only adapters reject it.
    async fn ingest_push(
        &self,
        _ctx: &AdapterContext,
        _payload: &serde_json::Value,
    ) -> Result<bool> {
        Err(crate::error::StreamError::Config(
            "adapter does not accept push delivery".to_string(),
        ))
    }

    /// Release resources. Called once when the stream is unregistered.
    async fn shutdown(&self);
}

/// Initialize an adapter from its stored config. `E_CONFIG` on bad shape.
pub fn build_adapter(
    adapter_type: AdapterType,
    config: &serde_json::Value,
) -> Result<Arc<dyn StreamAdapter>> {
    Ok(match adapter_type {
        AdapterType::FileDrop => Arc::new(FileDropAdapter::from_config(config)?),
        AdapterType::PollableChat => Arc::new(ChatApiAdapter::from_config(config)?),
        AdapterType::BotChat => Arc::new(BotChatAdapter::from_config(config)?),
    })
}

/// `ValidateConfig` — shape check without keeping the adapter.
pub fn validate_config(adapter_type: AdapterType, config: &serde_json::Value) -> bool {
    build_adapter(adapter_type, config).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_rejects_wrong_shapes() {
        assert!(!validate_config(
            AdapterType::FileDrop,
            &serde_json::json!({"unexpected": true})
        ));
        assert!(!validate_config(AdapterType::BotChat, &serde_json::json!({})));
        assert!(validate_config(
            AdapterType::FileDrop,
            &serde_json::json!({"drop_dir": "/tmp/drops"})
        ));
        assert!(validate_config(
            AdapterType::BotChat,
            &serde_json::json!({"bot_token": "123:abc"})
        ));
        assert!(validate_config(
            AdapterType::PollableChat,
            &serde_json::json!({
                "base_url": "https://chat.example.com",
                "api_token": "t",
                "channels": ["support"]
            })
        ));
    }
}
