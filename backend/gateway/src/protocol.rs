//! Line protocol spoken over the raw TCP stream.
//!
//! Every frame is one UTF-8 JSON document terminated by `\n`.
//!
//! Client → server:
//! - first frame: `{"UsuariID": "7", "IDEsdeveniment": "3"}`
//! - then any number of `{"Text": "..."}`
//!
//! Server → client:
//! - history snapshots: a JSON array of messages, oldest first
//! - `{"error": "..."}` before the server hangs up (or after a failed post)

use std::str::FromStr;
use std::sync::Arc;

use serde_json::{Map, Value};

use eventchat_core::{ChatError, ChatMessage, EventId, UserId};

pub const USER_KEY: &str = "UsuariID";
pub const EVENT_KEY: &str = "IDEsdeveniment";
pub const TEXT_KEY: &str = "Text";

/// A fully encoded outbound line, shared between every subscriber it goes to.
pub type OutboundFrame = Arc<str>;

/// The handshake a client opens its session with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthRequest {
    pub user: UserId,
    pub event: EventId,
}

impl AuthRequest {
    pub fn parse(line: &str) -> Result<Self, ChatError> {
        let fields = parse_object(line)?;
        Ok(Self {
            user: id_field(&fields, USER_KEY)?,
            event: id_field(&fields, EVENT_KEY)?,
        })
    }
}

/// Extract the text a client wants to post.
///
/// `Ok(None)` means the frame carries nothing to post (blank line, missing or
/// blank `Text`) and should be skipped. A line that is not a JSON object is a
/// protocol error.
pub fn parse_post(line: &str) -> Result<Option<String>, ChatError> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let mut fields = parse_object(line)?;
    match fields.remove(TEXT_KEY) {
        Some(Value::String(text)) if !text.trim().is_empty() => Ok(Some(text)),
        _ => Ok(None),
    }
}

pub fn history_frame(history: &[ChatMessage]) -> Result<OutboundFrame, ChatError> {
    let json = serde_json::to_string(history)
        .map_err(|e| ChatError::Protocol(format!("failed to encode history: {e}")))?;
    Ok(json.into())
}

pub fn error_frame(message: &str) -> OutboundFrame {
    serde_json::json!({ "error": message }).to_string().into()
}

fn parse_object(line: &str) -> Result<Map<String, Value>, ChatError> {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(fields)) => Ok(fields),
        Ok(_) => Err(ChatError::Protocol("frame is not a JSON object".to_string())),
        Err(e) => Err(ChatError::Protocol(format!("malformed JSON: {e}"))),
    }
}

/// Identifiers travel as numeric strings; bare JSON integers are accepted too.
fn id_field<T>(fields: &Map<String, Value>, key: &str) -> Result<T, ChatError>
where
    T: FromStr + From<i64>,
{
    let invalid = || ChatError::Protocol(format!("{key} must be a numeric identifier"));
    match fields.get(key) {
        Some(Value::String(raw)) => raw.parse().map_err(|_| invalid()),
        Some(Value::Number(n)) => n.as_i64().map(T::from).ok_or_else(invalid),
        Some(_) => Err(invalid()),
        None => Err(ChatError::Protocol(format!("missing {key}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_auth_with_string_ids() {
        let auth = AuthRequest::parse(r#"{"UsuariID":"7","IDEsdeveniment":"3"}"#).unwrap();
        assert_eq!(auth, AuthRequest { user: UserId(7), event: EventId(3) });
    }

    #[test]
    fn test_parse_auth_with_numeric_ids() {
        let auth = AuthRequest::parse(r#"{"UsuariID":7,"IDEsdeveniment":3}"#).unwrap();
        assert_eq!(auth.user, UserId(7));
        assert_eq!(auth.event, EventId(3));
    }

    #[test]
    fn test_parse_auth_rejects_missing_key() {
        let err = AuthRequest::parse(r#"{"UsuariID":"7"}"#).unwrap_err();
        assert!(matches!(err, ChatError::Protocol(ref m) if m.contains(EVENT_KEY)));
    }

    #[test]
    fn test_parse_auth_rejects_non_numeric_id() {
        let err = AuthRequest::parse(r#"{"UsuariID":"anna","IDEsdeveniment":"3"}"#).unwrap_err();
        assert!(matches!(err, ChatError::Protocol(_)));
    }

    #[test]
    fn test_parse_auth_rejects_garbage() {
        assert!(AuthRequest::parse("hello").is_err());
        assert!(AuthRequest::parse(r#"["7","3"]"#).is_err());
    }

    #[test]
    fn test_parse_post() {
        assert_eq!(parse_post(r#"{"Text":"hello"}"#).unwrap(), Some("hello".to_string()));
        assert_eq!(parse_post(r#"{"Text":"  "}"#).unwrap(), None);
        assert_eq!(parse_post(r#"{"Text":""}"#).unwrap(), None);
        assert_eq!(parse_post(r#"{"Other":"x"}"#).unwrap(), None);
        assert_eq!(parse_post("   ").unwrap(), None);
        assert!(parse_post("{not json").is_err());
    }

    #[test]
    fn test_post_text_is_kept_verbatim() {
        assert_eq!(parse_post(r#"{"Text":"  hi  "}"#).unwrap(), Some("  hi  ".to_string()));
    }

    #[test]
    fn test_frames() {
        assert_eq!(&*history_frame(&[]).unwrap(), "[]");
        let err: Value = serde_json::from_str(&error_frame("nope")).unwrap();
        assert_eq!(err["error"], "nope");
    }
}
