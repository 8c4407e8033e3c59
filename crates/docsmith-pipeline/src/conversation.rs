//! Conversation grouping and reply-chain depth.

use std::collections::{HashMap, HashSet};

use chrono::Duration;
use sha2::{Digest, Sha256};

use docsmith_core::config::PipelineConfig;
use docsmith_store::types::UnifiedMessage;

/// A set of messages grouped by channel/topic and time proximity within a
/// batch. Logical entity — persisted as a `conversation_id` column on the
/// messages.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub channel: Option<String>,
    pub topic: Option<String>,
    pub messages: Vec<UnifiedMessage>,
}

impl Conversation {
    pub fn message_ids(&self) -> Vec<i64> {
        self.messages.iter().map(|m| m.id).collect()
    }

    pub fn contains_any(&self, ids: &HashSet<i64>) -> bool {
        self.messages.iter().any(|m| ids.contains(&m.id))
    }
}

/// Group a batch's messages into conversations.
///
/// Same `(channel, topic)`, joined while the gap to the previous message
/// stays within `min_conversation_gap` and the whole run within
/// `conversation_time_window`; hard-capped at `max_conversation_size` with
/// oversized runs splitting exactly at the cap.
pub fn group_conversations(
    stream_id: &str,
    batch_msgs: &[UnifiedMessage],
    config: &PipelineConfig,
) -> Vec<Conversation> {
    let window = Duration::minutes(config.conversation_time_window_minutes as i64);
    let max_gap = Duration::minutes(config.min_conversation_gap_minutes as i64);

    // Partition by (channel, topic), preserving batch order inside each.
    let mut partitions: Vec<((Option<String>, Option<String>), Vec<&UnifiedMessage>)> = Vec::new();
    for msg in batch_msgs {
        let key = (msg.channel.clone(), msg.topic().map(String::from));
        match partitions.iter_mut().find(|(k, _)| *k == key) {
            Some((_, msgs)) => msgs.push(msg),
            None => partitions.push((key, vec![msg])),
        }
    }

    let mut conversations = Vec::new();
    for ((channel, topic), msgs) in partitions {
        let mut current: Vec<&UnifiedMessage> = Vec::new();
        for msg in msgs {
            let split = match current.last() {
                None => false,
                Some(last) => {
                    msg.timestamp - last.timestamp > max_gap
                        || msg.timestamp - current[0].timestamp > window
                        || current.len() >= config.max_conversation_size
                }
            };
            if split {
                conversations.push(finish_group(stream_id, &channel, &topic, &current));
                current.clear();
            }
            current.push(msg);
        }
        if !current.is_empty() {
            conversations.push(finish_group(stream_id, &channel, &topic, &current));
        }
    }
    conversations
}

fn finish_group(
    stream_id: &str,
    channel: &Option<String>,
    topic: &Option<String>,
    msgs: &[&UnifiedMessage],
) -> Conversation {
    let first = msgs[0];
    let id = conversation_id(
        stream_id,
        channel.as_deref(),
        topic.as_deref(),
        &first.timestamp.to_rfc3339(),
        &first.message_id,
    );
    Conversation {
        id,
        channel: channel.clone(),
        topic: topic.clone(),
        messages: msgs.iter().map(|m| (*m).clone()).collect(),
    }
}

/// `hash(stream_id, channel, topic, time_bucket_start, first_message_id)`.
pub fn conversation_id(
    stream_id: &str,
    channel: Option<&str>,
    topic: Option<&str>,
    bucket_start: &str,
    first_message_id: &str,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(stream_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(channel.unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(topic.unwrap_or_default().as_bytes());
    hasher.update([0x1f]);
    hasher.update(bucket_start.as_bytes());
    hasher.update([0x1f]);
    hasher.update(first_message_id.as_bytes());
    format!("conv-{}", &hex::encode(hasher.finalize())[..16])
}

/// Reply-chain indentation depth per message (keyed by source message id).
///
/// A message replying to another conversation member sits one level below
/// it, capped at `max_depth`. Replies pointing outside the conversation
/// render flat; a visited set terminates on reply cycles.
pub fn reply_depths(messages: &[UnifiedMessage], max_depth: usize) -> HashMap<String, usize> {
    let by_id: HashMap<&str, &UnifiedMessage> = messages
        .iter()
        .map(|m| (m.message_id.as_str(), m))
        .collect();

    let mut depths: HashMap<String, usize> = HashMap::new();
    for msg in messages {
        let mut depth = 0usize;
        let mut visited: HashSet<&str> = HashSet::new();
        visited.insert(msg.message_id.as_str());

        let mut cursor = msg.reply_to_message_id();
        while let Some(parent_id) = cursor {
            let Some(parent) = by_id.get(parent_id) else {
                break; // reply target outside the conversation — flat
            };
            if !visited.insert(parent_id) {
                break; // cycle
            }
            depth += 1;
            if depth >= max_depth {
                break;
            }
            cursor = parent.reply_to_message_id();
        }
        depths.insert(msg.message_id.clone(), depth);
    }
    depths
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use docsmith_store::types::ProcessingStatus;

    fn at(min: u32, sec: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 10, 2, 10, min, sec).unwrap()
    }

    fn msg(id: i64, mid: &str, ts: DateTime<Utc>, channel: &str, topic: Option<&str>) -> UnifiedMessage {
        let mut metadata = serde_json::Map::new();
        if let Some(topic) = topic {
            metadata.insert("topic".into(), topic.into());
        }
        UnifiedMessage {
            id,
            tenant_id: "t1".into(),
            stream_id: "s1".into(),
            message_id: mid.into(),
            timestamp: ts,
            author: "alice".into(),
            content: "text".into(),
            channel: Some(channel.into()),
            raw_data: "{}".into(),
            metadata: serde_json::Value::Object(metadata),
            embedding: None,
            conversation_id: None,
            processing_status: ProcessingStatus::Pending,
            failure_count: 0,
            last_error: None,
            created_at: ts,
        }
    }

    fn reply(mut m: UnifiedMessage, to: &str) -> UnifiedMessage {
        m.metadata["reply_to_message_id"] = to.into();
        m
    }

    fn config() -> PipelineConfig {
        PipelineConfig::default()
    }

    #[test]
    fn groups_by_channel_and_topic() {
        let msgs = vec![
            msg(1, "m1", at(0, 0), "support", Some("rpc")),
            msg(2, "m2", at(0, 30), "support", Some("auth")),
            msg(3, "m3", at(1, 0), "support", Some("rpc")),
        ];
        let convs = group_conversations("s1", &msgs, &config());
        assert_eq!(convs.len(), 2);
        let rpc = convs.iter().find(|c| c.topic.as_deref() == Some("rpc")).unwrap();
        assert_eq!(rpc.message_ids(), vec![1, 3]);
    }

    #[test]
    fn splits_on_gap() {
        let msgs = vec![
            msg(1, "m1", at(0, 0), "support", None),
            msg(2, "m2", at(2, 0), "support", None),
            // 6-minute gap exceeds the 5-minute split threshold.
            msg(3, "m3", at(8, 0), "support", None),
        ];
        let convs = group_conversations("s1", &msgs, &config());
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].message_ids(), vec![1, 2]);
        assert_eq!(convs[1].message_ids(), vec![3]);
    }

    #[test]
    fn splits_when_window_is_exceeded() {
        // Messages every 4 minutes never exceed the gap, but the total span
        // crosses the 15-minute window after the fourth message.
        let msgs: Vec<UnifiedMessage> = (0..6)
            .map(|i| msg(i as i64 + 1, &format!("m{i}"), at(4 * i, 0), "c", None))
            .collect();
        let convs = group_conversations("s1", &msgs, &config());
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].message_ids(), vec![1, 2, 3, 4]);
        assert_eq!(convs[1].message_ids(), vec![5, 6]);
    }

    #[test]
    fn splits_exactly_at_size_cap() {
        let mut cfg = config();
        cfg.max_conversation_size = 3;
        cfg.conversation_time_window_minutes = 60;
        let msgs: Vec<UnifiedMessage> = (0..4)
            .map(|i| msg(i as i64 + 1, &format!("m{i}"), at(0, 10 * i), "c", None))
            .collect();
        let convs = group_conversations("s1", &msgs, &cfg);
        assert_eq!(convs.len(), 2);
        assert_eq!(convs[0].messages.len(), 3);
        assert_eq!(convs[1].messages.len(), 1);
    }

    #[test]
    fn conversation_of_one_is_valid_and_id_is_deterministic() {
        let msgs = vec![msg(1, "m1", at(0, 0), "support", None)];
        let a = group_conversations("s1", &msgs, &config());
        let b = group_conversations("s1", &msgs, &config());
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, b[0].id);
        assert!(a[0].id.starts_with("conv-"));
    }

    #[test]
    fn reply_depths_indent_and_cap() {
        let msgs = vec![
            msg(1, "m1", at(0, 0), "c", None),
            reply(msg(2, "m2", at(0, 10), "c", None), "m1"),
            reply(msg(3, "m3", at(0, 20), "c", None), "m2"),
        ];
        let depths = reply_depths(&msgs, 5);
        assert_eq!(depths["m1"], 0);
        assert_eq!(depths["m2"], 1);
        assert_eq!(depths["m3"], 2);
    }

    #[test]
    fn reply_outside_batch_renders_flat() {
        let msgs = vec![reply(msg(1, "m1", at(0, 0), "c", None), "missing")];
        let depths = reply_depths(&msgs, 5);
        assert_eq!(depths["m1"], 0);
    }

    #[test]
    fn reply_cycle_terminates() {
        let msgs = vec![
            reply(msg(1, "m1", at(0, 0), "c", None), "m2"),
            reply(msg(2, "m2", at(0, 10), "c", None), "m1"),
        ];
        let depths = reply_depths(&msgs, 5);
        // Each sees one parent hop before the visited set stops the walk.
        assert_eq!(depths["m1"], 1);
        assert_eq!(depths["m2"], 1);
    }

    #[test]
    fn depth_caps_at_limit() {
        let mut msgs = vec![msg(1, "m0", at(0, 0), "c", None)];
        for i in 1..10 {
            msgs.push(reply(
                msg(i as i64 + 1, &format!("m{i}"), at(0, i), "c", None),
                &format!("m{}", i - 1),
            ));
        }
        let depths = reply_depths(&msgs, 5);
        assert_eq!(depths["m9"], 5);
    }
}
