//! Prompt rendering for the classify and generate steps.

use docsmith_store::types::UnifiedMessage;

use crate::conversation::{reply_depths, Conversation};

/// Reply indentation never goes deeper than this.
pub const MAX_REPLY_DEPTH: usize = 5;

/// One line per message: `[id=N] author: content`. Database ids keep the
/// classifier's `message_id` references unambiguous.
pub fn render_message_line(msg: &UnifiedMessage) -> String {
    let content = msg.content.replace('\n', " ");
    format!(
        "[id={}] {} {}: {}",
        msg.id,
        msg.timestamp.format("%H:%M"),
        msg.author,
        content
    )
}

/// The classifier input: prior context (not to be classified) followed by
/// the batch messages.
pub fn render_classification_input(
    context_msgs: &[UnifiedMessage],
    batch_msgs: &[UnifiedMessage],
) -> String {
    let mut out = String::new();
    if !context_msgs.is_empty() {
        out.push_str("Context messages (for flow awareness only, do NOT classify):\n");
        for msg in context_msgs {
            out.push_str(&render_message_line(msg));
            out.push('\n');
        }
        out.push('\n');
    }
    out.push_str("Messages to classify:\n");
    for msg in batch_msgs {
        out.push_str(&render_message_line(msg));
        out.push('\n');
    }
    out
}

/// A conversation with reply-chain indentation: a message replying to
/// another member is indented one level below it.
pub fn render_conversation(conversation: &Conversation) -> String {
    let depths = reply_depths(&conversation.messages, MAX_REPLY_DEPTH);
    let mut out = String::new();
    if let Some(channel) = &conversation.channel {
        out.push_str(&format!("Channel: {channel}"));
        if let Some(topic) = &conversation.topic {
            out.push_str(&format!(" / topic: {topic}"));
        }
        out.push('\n');
    }
    for msg in &conversation.messages {
        let depth = depths.get(&msg.message_id).copied().unwrap_or(0);
        out.push_str(&"  ".repeat(depth));
        out.push_str(&render_message_line(msg));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use docsmith_store::types::ProcessingStatus;

    fn msg(id: i64, mid: &str, reply_to: Option<&str>, content: &str) -> UnifiedMessage {
        let mut metadata = serde_json::Map::new();
        if let Some(r) = reply_to {
            metadata.insert("reply_to_message_id".into(), r.into());
        }
        UnifiedMessage {
            id,
            tenant_id: "t1".into(),
            stream_id: "s1".into(),
            message_id: mid.into(),
            timestamp: Utc.with_ymd_and_hms(2025, 10, 2, 10, id as u32, 0).unwrap(),
            author: "alice".into(),
            content: content.into(),
            channel: Some("support".into()),
            raw_data: "{}".into(),
            metadata: serde_json::Value::Object(metadata),
            embedding: None,
            conversation_id: None,
            processing_status: ProcessingStatus::Pending,
            failure_count: 0,
            last_error: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn replies_are_indented_under_their_parent() {
        let conv = Conversation {
            id: "conv-x".into(),
            channel: Some("support".into()),
            topic: None,
            messages: vec![
                msg(1, "m1", None, "how do I set the rpc timeout?"),
                msg(2, "m2", None, "which client?"),
                msg(3, "m3", Some("m2"), "the rust one"),
            ],
        };
        let rendered = render_conversation(&conv);
        let lines: Vec<&str> = rendered.lines().collect();
        assert!(lines[1].starts_with("[id=1]"));
        assert!(lines[2].starts_with("[id=2]"));
        assert!(lines[3].starts_with("  [id=3]"));
    }

    #[test]
    fn classification_input_separates_context() {
        let context = vec![msg(1, "m1", None, "earlier chatter")];
        let batch = vec![msg(2, "m2", None, "the actual question")];
        let rendered = render_classification_input(&context, &batch);
        let context_pos = rendered.find("do NOT classify").unwrap();
        let batch_pos = rendered.find("Messages to classify:").unwrap();
        assert!(context_pos < batch_pos);
        assert!(rendered.contains("[id=2]"));
    }

    #[test]
    fn newlines_in_content_are_flattened() {
        let line = render_message_line(&msg(7, "m7", None, "a\nb"));
        assert!(line.contains("a b"));
        assert!(!line.contains('\n'));
    }
}
