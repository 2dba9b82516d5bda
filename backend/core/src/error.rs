use thiserror::Error;
use tokio_util::codec::LinesCodecError;

/// Everything that can end or disturb a chat session.
#[derive(Debug, Error)]
pub enum ChatError {
    /// Undecodable frame or missing required field.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Unknown user or event.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The connection is gone; nothing can be sent back.
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),

    #[error("store rejected message: {0}")]
    Persistence(anyhow::Error),

    /// The identity or history lookup itself failed.
    #[error("gateway unavailable: {0}")]
    Gateway(anyhow::Error),
}

impl ChatError {
    /// The text of the `{"error": ...}` frame owed to the client, if any.
    pub fn reply(&self) -> Option<String> {
        match self {
            ChatError::Protocol(reason) => Some(format!("invalid request: {reason}")),
            ChatError::Validation(_) => Some("user or event does not exist".to_string()),
            ChatError::Persistence(_) => Some("message could not be saved".to_string()),
            ChatError::Gateway(_) => Some("service unavailable, try again later".to_string()),
            ChatError::Transport(_) => None,
        }
    }
}

impl From<LinesCodecError> for ChatError {
    fn from(err: LinesCodecError) -> Self {
        match err {
            LinesCodecError::MaxLineLengthExceeded => {
                ChatError::Protocol("frame exceeds maximum length".to_string())
            }
            LinesCodecError::Io(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                ChatError::Protocol("frame is not valid UTF-8".to_string())
            }
            LinesCodecError::Io(e) => ChatError::Transport(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_errors_get_no_reply() {
        let err = ChatError::from(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
        assert!(err.reply().is_none());
    }

    #[test]
    fn test_codec_overflow_is_protocol_error() {
        let err = ChatError::from(LinesCodecError::MaxLineLengthExceeded);
        assert!(matches!(err, ChatError::Protocol(_)));
        assert!(err.reply().unwrap().contains("maximum length"));
    }

    #[test]
    fn test_undecodable_line_is_protocol_error() {
        let io = std::io::Error::new(std::io::ErrorKind::InvalidData, "not UTF-8");
        let err = ChatError::from(LinesCodecError::Io(io));
        assert!(matches!(err, ChatError::Protocol(_)));
        assert_eq!(err.reply().as_deref(), Some("invalid request: frame is not valid UTF-8"));

        let reset = LinesCodecError::Io(std::io::ErrorKind::ConnectionReset.into());
        assert!(matches!(ChatError::from(reset), ChatError::Transport(_)));
    }

    #[test]
    fn test_validation_reply_is_generic() {
        let err = ChatError::Validation("user 999".into());
        assert_eq!(err.reply().as_deref(), Some("user or event does not exist"));
    }
}
