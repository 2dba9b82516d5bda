//! Chat Event Logger
//!
//! Structured session lifecycle events written through `tracing` under the
//! `chat_events` target, so the JSON file layer turns them into NDJSON.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::redact::redact_sensitive_data;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ChatEvent {
    Connected {
        user_id: i64,
        event_id: i64,
    },
    AuthRejected {
        peer: String,
        reason: String,
    },
    MessagePosted {
        user_id: i64,
        event_id: i64,
        text: String,
    },
    SubscriberPruned {
        user_id: i64,
        event_id: i64,
    },
    Disconnected {
        user_id: i64,
        event_id: i64,
    },
}

#[derive(Debug, Serialize)]
pub struct EventLogEntry {
    pub timestamp: DateTime<Utc>,
    pub event: ChatEvent,
}

impl EventLogEntry {
    /// Build a log entry, scrubbing any free text the event carries.
    pub fn new(mut event: ChatEvent) -> Self {
        match &mut event {
            ChatEvent::MessagePosted { text, .. } => *text = redact_sensitive_data(text),
            ChatEvent::AuthRejected { reason, .. } => *reason = redact_sensitive_data(reason),
            _ => {}
        }
        Self {
            timestamp: Utc::now(),
            event,
        }
    }
}

pub struct ChatEventLogger;

impl ChatEventLogger {
    pub fn log_event(event: ChatEvent) {
        let entry = EventLogEntry::new(event);
        info!(target: "chat_events", event = ?entry, "Chat event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_text_is_redacted() {
        let entry = EventLogEntry::new(ChatEvent::MessagePosted {
            user_id: 7,
            event_id: 3,
            text: "my number is 555-123-4567".into(),
        });
        match entry.event {
            ChatEvent::MessagePosted { text, .. } => {
                assert_eq!(text, "my number is [REDACTED_PHONE]")
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_entry_serializes_with_type_tag() {
        let entry = EventLogEntry::new(ChatEvent::Disconnected { user_id: 7, event_id: 3 });
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["event"]["type"], "Disconnected");
        assert_eq!(json["event"]["user_id"], 7);
    }
}
