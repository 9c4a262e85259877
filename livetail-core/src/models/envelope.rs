//! Event envelope exchanged over the broker and the outbound stream
//!
//! Wire format (JSON, UTF-8):
//! `{ "type": <string>, "threadId": <string>, "content": <string|object>, "ts": <ms> }`

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::id::ThreadId;
use crate::{Error, Result};

/// Broker-level event types.
///
/// `open` and `close` are transport control frames and intentionally have no
/// variant here, so an envelope claiming either one fails to decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Token,
    Status,
    Delta,
    Done,
    Error,
}

impl EventType {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Token => "token",
            Self::Status => "status",
            Self::Delta => "delta",
            Self::Done => "done",
            Self::Error => "error",
        }
    }

    /// `done` and `error` end a relay session
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "token" => Ok(Self::Token),
            "status" => Ok(Self::Status),
            "delta" => Ok(Self::Delta),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            other => Err(Error::InvalidInput(format!("Unknown event type: {other}"))),
        }
    }
}

/// Envelope payload. Free text or a structured JSON value, never inspected
/// by the relay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Structured(serde_json::Value),
}

impl Content {
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            Self::Structured(_) => None,
        }
    }
}

impl From<&str> for Content {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for Content {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<serde_json::Value> for Content {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::String(s) => Self::Text(s),
            other => Self::Structured(other),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub thread_id: ThreadId,
    pub content: Content,
    /// Milliseconds since epoch, assigned at publish time
    pub ts: i64,
}

impl Envelope {
    /// Build an envelope stamped with the current time
    pub fn new(event_type: EventType, thread_id: ThreadId, content: impl Into<Content>) -> Self {
        Self {
            event_type,
            thread_id,
            content: content.into(),
            ts: Utc::now().timestamp_millis(),
        }
    }

    pub fn decode(payload: &str) -> Result<Self> {
        Ok(serde_json::from_str(payload)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_text_content() {
        let env =
            Envelope::decode(r#"{"type":"token","threadId":"t1","content":"Hello","ts":1000}"#)
                .unwrap();
        assert_eq!(env.event_type, EventType::Token);
        assert_eq!(env.thread_id.as_str(), "t1");
        assert_eq!(env.content.as_text(), Some("Hello"));
        assert_eq!(env.ts, 1000);
        assert!(!env.is_terminal());
    }

    #[test]
    fn test_decode_structured_content() {
        let env = Envelope::decode(
            r#"{"type":"status","threadId":"t1","content":{"status":"processing"},"ts":5}"#,
        )
        .unwrap();
        assert_eq!(
            env.content,
            Content::Structured(json!({"status": "processing"}))
        );
    }

    #[test]
    fn test_control_types_are_not_envelopes() {
        for kind in ["open", "close", "heartbeat"] {
            let payload = format!(r#"{{"type":"{kind}","threadId":"t1","content":"","ts":1}}"#);
            assert!(Envelope::decode(&payload).is_err(), "{kind} must be rejected");
        }
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        assert!(Envelope::decode("not json").is_err());
        assert!(Envelope::decode(r#"{"type":"token","threadId":"t1"}"#).is_err());
    }

    #[test]
    fn test_wire_field_names() {
        let env = Envelope {
            event_type: EventType::Done,
            thread_id: ThreadId::from("t1"),
            content: Content::from(""),
            ts: 2000,
        };
        let value: serde_json::Value = serde_json::from_str(&env.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"type": "done", "threadId": "t1", "content": "", "ts": 2000})
        );
        assert!(env.is_terminal());
    }

    #[test]
    fn test_new_stamps_timestamp() {
        let before = Utc::now().timestamp_millis();
        let env = Envelope::new(EventType::Delta, ThreadId::from("t"), "x");
        assert!(env.ts >= before);
    }

    #[test]
    fn test_event_type_from_str() {
        assert_eq!("error".parse::<EventType>().unwrap(), EventType::Error);
        assert!("close".parse::<EventType>().is_err());
    }
}
