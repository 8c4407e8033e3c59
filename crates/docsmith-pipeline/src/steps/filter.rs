//! filter — drop obviously irrelevant messages, then group what remains
//! into conversations. Pure function, no external calls.

use async_trait::async_trait;
use tracing::debug;

use docsmith_store::types::UnifiedMessage;

use crate::conversation::group_conversations;
use crate::error::Result;
use crate::orchestrator::{PipelineContext, PipelineState, PipelineStep, StepOutcome};

pub struct FilterStep;

/// Zero-length content, bot echoes and bare slash-commands carry no
/// documentation value.
fn is_relevant(msg: &UnifiedMessage) -> bool {
    let content = msg.content.trim();
    if content.is_empty() {
        return false;
    }
    if content.starts_with('/') && !content.contains(' ') {
        return false;
    }
    if msg.author.to_lowercase().ends_with("bot") {
        return false;
    }
    if msg
        .metadata
        .get("is_bot")
        .and_then(|v| v.as_bool())
        .unwrap_or(false)
    {
        return false;
    }
    true
}

#[async_trait]
impl PipelineStep for FilterStep {
    fn name(&self) -> &'static str {
        "filter"
    }

    async fn run(&self, ctx: &PipelineContext, state: &mut PipelineState) -> Result<StepOutcome> {
        let before = state.batch_msgs.len();
        state.batch_msgs.retain(is_relevant);
        let dropped = before - state.batch_msgs.len();
        if dropped > 0 {
            debug!(dropped, remaining = state.batch_msgs.len(), "messages filtered");
        }

        if state.batch_msgs.is_empty() {
            return Ok(StepOutcome::ShortCircuit(
                "no messages left after filtering".to_string(),
            ));
        }

        state.conversations =
            group_conversations(&state.stream_id, &state.batch_msgs, &ctx.config);
        Ok(StepOutcome::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docsmith_store::types::ProcessingStatus;

    fn msg(author: &str, content: &str, is_bot: bool) -> UnifiedMessage {
        UnifiedMessage {
            id: 1,
            tenant_id: "t".into(),
            stream_id: "s".into(),
            message_id: "m".into(),
            timestamp: Utc::now(),
            author: author.into(),
            content: content.into(),
            channel: None,
            raw_data: "{}".into(),
            metadata: serde_json::json!({"is_bot": is_bot}),
            embedding: None,
            conversation_id: None,
            processing_status: ProcessingStatus::Pending,
            failure_count: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn relevance_rules() {
        assert!(is_relevant(&msg("alice", "how do I set timeouts?", false)));
        assert!(!is_relevant(&msg("alice", "  ", false)));
        assert!(!is_relevant(&msg("alice", "/start", false)));
        assert!(is_relevant(&msg("alice", "/start the daemon with...", false)));
        assert!(!is_relevant(&msg("HelperBot", "I am a bot reply", false)));
        assert!(!is_relevant(&msg("alice", "echoed", true)));
    }
}
