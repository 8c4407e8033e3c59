use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque tenant identifier. Partitions every stored entity; one pipeline
/// instance serves exactly one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

impl TenantId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Identifier of a configured message stream, unique within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub String);

impl StreamId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for StreamId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for StreamId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The kind of source behind a stream. Closed set — adding a variant means
/// adding a normaliser, nothing downstream changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AdapterType {
    /// CSV drops scanned from a local directory.
    FileDrop,
    /// Chat API enumerated by channel and topic.
    PollableChat,
    /// Bot-delivered chat pulled via long-poll (or pushed via webhook).
    BotChat,
}

impl fmt::Display for AdapterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdapterType::FileDrop => write!(f, "file-drop"),
            AdapterType::PollableChat => write!(f, "pollable-chat"),
            AdapterType::BotChat => write!(f, "bot-chat"),
        }
    }
}

impl std::str::FromStr for AdapterType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "file-drop" => Ok(AdapterType::FileDrop),
            "pollable-chat" => Ok(AdapterType::PollableChat),
            "bot-chat" => Ok(AdapterType::BotChat),
            other => Err(format!("unknown adapter type: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn adapter_type_roundtrip() {
        for t in [
            AdapterType::FileDrop,
            AdapterType::PollableChat,
            AdapterType::BotChat,
        ] {
            let s = t.to_string();
            assert_eq!(AdapterType::from_str(&s).unwrap(), t);
        }
    }

    #[test]
    fn adapter_type_rejects_unknown() {
        assert!(AdapterType::from_str("imap").is_err());
    }
}
