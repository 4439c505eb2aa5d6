//! Chat message model: one turn entry in a session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::protocol::ReferenceItem;

/// Message author. Persisted as the numeric `type` field: 0 = bot, 1 = user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Author {
    Bot,
    User,
}

/// One message in a conversation.
///
/// Content, thought, and references are replaced wholesale by protocol
/// events, never appended to. `is_waiting` is a UI signal and is not
/// persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Sequence number, unique within the owning session
    pub id: u64,
    pub content: String,
    #[serde(rename = "type", with = "author_code")]
    pub author: Author,
    /// Creation time; serialized as epoch milliseconds
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// True from creation of a bot turn until its stream terminates
    #[serde(skip)]
    pub is_waiting: bool,
    /// Reasoning trace from the assistant, bot messages only
    #[serde(default)]
    pub thought: Option<String>,
    /// Citations attached to the reply
    #[serde(default)]
    pub references: Vec<ReferenceItem>,
}

impl Message {
    /// Create a user message with the given content.
    pub fn user(id: u64, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
            author: Author::User,
            timestamp: Utc::now(),
            is_waiting: false,
            thought: None,
            references: Vec::new(),
        }
    }

    /// Create an empty bot placeholder, waiting for the server.
    pub fn bot(id: u64) -> Self {
        Self {
            id,
            content: String::new(),
            author: Author::Bot,
            timestamp: Utc::now(),
            is_waiting: true,
            thought: None,
            references: Vec::new(),
        }
    }
}

/// Serde adapter for the numeric author code.
mod author_code {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Author;

    pub fn serialize<S: Serializer>(author: &Author, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(match author {
            Author::Bot => 0,
            Author::User => 1,
        })
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Author, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(Author::Bot),
            1 => Ok(Author::User),
            other => Err(D::Error::custom(format!("unknown author code {other}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bot_placeholder_starts_waiting_and_empty() {
        let msg = Message::bot(3);
        assert_eq!(msg.id, 3);
        assert_eq!(msg.author, Author::Bot);
        assert!(msg.is_waiting);
        assert!(msg.content.is_empty());
        assert!(msg.thought.is_none());
        assert!(msg.references.is_empty());
    }

    #[test]
    fn test_serde_layout_uses_numeric_type_and_millis() {
        let msg = Message::user(1, "hello");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], 1);
        assert_eq!(value["content"], "hello");
        assert!(value["timestamp"].is_i64());
        // is_waiting is a runtime flag, never persisted
        assert!(value.get("is_waiting").is_none());
    }

    #[test]
    fn test_round_trip_preserves_thought_and_references() {
        let mut msg = Message::bot(0);
        msg.content = "answer".to_string();
        msg.thought = Some("step one".to_string());
        msg.references = vec![ReferenceItem {
            name: Some("doc".to_string()),
            url: Some("https://example.com".to_string()),
            ..Default::default()
        }];

        let json = serde_json::to_string(&msg).unwrap();
        let restored: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(restored.author, Author::Bot);
        assert_eq!(restored.content, "answer");
        assert_eq!(restored.thought.as_deref(), Some("step one"));
        assert_eq!(restored.references.len(), 1);
        assert!(!restored.is_waiting);
    }

    #[test]
    fn test_unknown_author_code_is_rejected() {
        let err = serde_json::from_str::<Message>(
            r#"{"id":0,"content":"","type":7,"timestamp":0}"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown author code"));
    }
}
