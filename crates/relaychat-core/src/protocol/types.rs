//! Wire types for the streaming chat protocol.
//!
//! Frames carry an envelope `{type, message_id, payload}`. Decoding is
//! two-stage: the envelope is parsed with an opaque payload first, then the
//! payload is parsed per type, so an unknown type degrades to
//! [`Event::Unknown`] instead of failing the frame.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Prefix of every well-formed frame in the event stream.
pub(crate) const DATA_PREFIX: &str = "data:";

/// `message_id` prefix marking server keep-alive frames.
pub(crate) const HEARTBEAT_PREFIX: &str = "heartbeat-";

/// Streaming request body.
#[derive(Debug, Serialize)]
pub struct StreamRequest<'a> {
    #[serde(rename = "sessionId")]
    pub session_id: &'a str,
    /// Prompt text (wire name kept for server compatibility)
    pub promo: &'a str,
}

/// Non-streaming fallback request body.
#[derive(Debug, Serialize)]
pub struct ChatRequest<'a> {
    pub session: &'a str,
    pub message: &'a str,
}

/// Non-streaming fallback response body.
#[derive(Debug, Deserialize)]
pub struct ChatResponse {
    #[serde(default)]
    pub data: String,
    #[serde(rename = "sessionId", default)]
    pub session_id: String,
}

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message_id: String,
    #[serde(default)]
    payload: Value,
}

/// Payload of `reply` and `unauthorize` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplyPayload {
    pub content: String,
    pub session_id: String,
    pub request_id: String,
    pub record_id: String,
    pub timestamp: i64,
    pub is_final: bool,
    pub is_from_self: bool,
    pub is_evil: bool,
    /// Dynamic shape; kept opaque and ignored by the core
    #[serde(skip_serializing_if = "Value::is_null")]
    pub quote_infos: Value,
}

/// Status of one reasoning procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThoughtStatus {
    Processing,
    Success,
    Failed,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThoughtDebugging {
    pub content: String,
}

/// One step of the assistant's reasoning trace.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThoughtProcedure {
    pub name: String,
    pub index: i64,
    pub status: ThoughtStatus,
    pub title: String,
    pub elapsed: i64,
    pub debugging: Option<ThoughtDebugging>,
}

/// Payload of `thought` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ThoughtPayload {
    pub session_id: String,
    pub request_id: String,
    pub record_id: String,
    pub trace_id: String,
    pub procedures: Vec<ThoughtProcedure>,
    pub elapsed: i64,
    pub is_workflow: bool,
    pub workflow_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStatProcedure {
    pub name: String,
    pub status: String,
    pub title: String,
    pub count: i64,
    pub input_count: i64,
    pub output_count: i64,
    pub resource_status: i64,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub debugging: Value,
}

/// Payload of `token_stat` events. Informational only; heartbeats reuse this
/// type with a synthetic `message_id`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenStatPayload {
    pub session_id: String,
    pub request_id: String,
    pub token_count: i64,
    pub used_count: i64,
    pub free_count: i64,
    pub order_count: i64,
    pub status_summary: String,
    pub status_summary_title: String,
    pub elapsed: i64,
    pub record_id: String,
    pub trace_id: String,
    pub procedures: Vec<TokenStatProcedure>,
}

/// One citation attached to a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferenceItem {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doc_biz_id: Option<String>,
}

/// Payload of `reference` events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReferencePayload {
    pub record_id: String,
    pub references: Vec<ReferenceItem>,
    pub trace_id: String,
}

/// One decoded protocol event.
#[derive(Debug, Clone)]
pub enum Event {
    Reply(ReplyPayload),
    Thought(ThoughtPayload),
    TokenStat {
        /// True for keep-alive frames (synthetic `message_id` prefix)
        heartbeat: bool,
        payload: TokenStatPayload,
    },
    Reference(ReferencePayload),
    /// Terminal server-signaled error; despite the name the server uses it
    /// for any rejected turn
    Unauthorize(ReplyPayload),
    Unknown {
        kind: String,
    },
}

impl Event {
    /// Parse the body of one frame (the `data:` prefix already stripped).
    pub fn parse(body: &str) -> serde_json::Result<Event> {
        let envelope: Envelope = serde_json::from_str(body)?;
        Ok(match envelope.kind.as_str() {
            "reply" => Event::Reply(serde_json::from_value(envelope.payload)?),
            "thought" => Event::Thought(serde_json::from_value(envelope.payload)?),
            "token_stat" => Event::TokenStat {
                heartbeat: envelope.message_id.starts_with(HEARTBEAT_PREFIX),
                payload: serde_json::from_value(envelope.payload)?,
            },
            "reference" => Event::Reference(serde_json::from_value(envelope.payload)?),
            "unauthorize" => Event::Unauthorize(serde_json::from_value(envelope.payload)?),
            _ => Event::Unknown {
                kind: envelope.kind,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_reply() {
        let event = Event::parse(
            r#"{"type":"reply","message_id":"m1","payload":{"content":"hi","session_id":"S1","is_final":false,"is_from_self":false}}"#,
        )
        .unwrap();
        match event {
            Event::Reply(payload) => {
                assert_eq!(payload.content, "hi");
                assert_eq!(payload.session_id, "S1");
                assert!(!payload.is_from_self);
            }
            other => panic!("Expected Reply, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_thought_with_debugging() {
        let event = Event::parse(
            r#"{"type":"thought","message_id":"m2","payload":{"procedures":[{"name":"search","index":0,"status":"processing","title":"Searching","elapsed":12,"debugging":{"content":"looking things up"}}],"is_workflow":false}}"#,
        )
        .unwrap();
        match event {
            Event::Thought(payload) => {
                let first = payload.procedures.first().unwrap();
                assert_eq!(first.status, ThoughtStatus::Processing);
                assert_eq!(
                    first.debugging.as_ref().unwrap().content,
                    "looking things up"
                );
            }
            other => panic!("Expected Thought, got {other:?}"),
        }
    }

    #[test]
    fn test_heartbeat_detection() {
        let event = Event::parse(
            r#"{"type":"token_stat","message_id":"heartbeat-123","payload":{"token_count":0}}"#,
        )
        .unwrap();
        assert!(matches!(event, Event::TokenStat { heartbeat: true, .. }));

        let event = Event::parse(
            r#"{"type":"token_stat","message_id":"m9","payload":{"token_count":42}}"#,
        )
        .unwrap();
        assert!(matches!(
            event,
            Event::TokenStat {
                heartbeat: false,
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_type_and_unknown_status_do_not_fail() {
        let event = Event::parse(r#"{"type":"metrics_v2","message_id":"m3","payload":{}}"#).unwrap();
        assert!(matches!(event, Event::Unknown { kind } if kind == "metrics_v2"));

        let event = Event::parse(
            r#"{"type":"thought","message_id":"m4","payload":{"procedures":[{"name":"x","status":"paused"}]}}"#,
        )
        .unwrap();
        match event {
            Event::Thought(payload) => {
                assert_eq!(payload.procedures[0].status, ThoughtStatus::Unknown)
            }
            other => panic!("Expected Thought, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_message_id_defaults_to_empty() {
        let event =
            Event::parse(r#"{"type":"token_stat","payload":{"token_count":1}}"#).unwrap();
        assert!(matches!(
            event,
            Event::TokenStat {
                heartbeat: false,
                ..
            }
        ));
    }
}
