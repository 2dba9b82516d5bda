//! Telemetry and structured logging for the event chat relay.
//!
//! Subscriber setup with a rotated JSON log file, redaction of chat text,
//! and the chat lifecycle event records.

pub mod event_logger;
pub mod logger;
pub mod redact;

pub use event_logger::{ChatEvent, ChatEventLogger, EventLogEntry};
pub use logger::{Console, LoggerConfig, LoggerGuard, init_logger};
pub use redact::redact_sensitive_data;
