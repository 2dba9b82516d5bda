use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{EventId, UserId};

/// A message a session wants persisted. The store assigns its sequence id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub author: UserId,
    pub event: EventId,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl NewMessage {
    pub fn new(author: UserId, event: EventId, text: impl Into<String>) -> Self {
        Self {
            author,
            event,
            text: text.into(),
            sent_at: Utc::now(),
        }
    }
}

/// A persisted chat message, as it appears inside a history snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(rename = "ID")]
    pub id: i64,
    #[serde(rename = "IDUser")]
    pub author: UserId,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "IDEsdeveniment")]
    pub event: EventId,
    #[serde(rename = "Data")]
    pub sent_at: DateTime<Utc>,
    #[serde(rename = "Enviat")]
    pub sent: bool,
}

impl ChatMessage {
    /// Materialize a stored row from the message that produced it.
    pub fn from_new(id: i64, msg: NewMessage) -> Self {
        Self {
            id,
            author: msg.author,
            text: msg.text,
            event: msg.event,
            sent_at: msg.sent_at,
            sent: true,
        }
    }
}

/// Ordering key of a history snapshot: send time, ties broken by store sequence.
pub fn sort_history(messages: &mut [ChatMessage]) {
    messages.sort_by(|a, b| a.sent_at.cmp(&b.sent_at).then(a.id.cmp(&b.id)));
}
