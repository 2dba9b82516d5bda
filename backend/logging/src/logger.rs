//! Global `tracing` subscriber.
//!
//! A human-readable console layer, plus an optional JSON layer that writes
//! one object per line into `<log_dir>/eventchat.log.YYYY-MM-DD` from a
//! background thread, so a slow disk never stalls a session task.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{InitError, RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

const LOG_FILE_PREFIX: &str = "eventchat.log";
const FALLBACK_LEVEL: &str = "info";

/// Stream the console layer writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    /// For commands whose stdout is their actual output.
    Stderr,
}

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// `EnvFilter` directives, e.g. `info` or `eventchat_gateway=debug`.
    pub level: String,
    pub console: Console,
    /// Directory of the rotated JSON log. `None` keeps logging console-only.
    pub log_dir: Option<PathBuf>,
}

impl LoggerConfig {
    pub fn stdout(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            console: Console::Stdout,
            log_dir: None,
        }
    }

    pub fn stderr(level: impl Into<String>) -> Self {
        Self {
            console: Console::Stderr,
            ..Self::stdout(level)
        }
    }

    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }
}

/// Flushes the file layer when dropped. Hold it until the process exits.
#[must_use = "dropping the guard stops the log file writer"]
pub struct LoggerGuard {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber described by `config`.
///
/// Fails only if the log directory cannot be created. If a subscriber is
/// already installed it is left in place.
pub fn init_logger(config: &LoggerConfig) -> Result<LoggerGuard, InitError> {
    let (file_layer, file_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix(LOG_FILE_PREFIX)
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().json().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let console_writer = match config.console {
        Console::Stdout => BoxMakeWriter::new(std::io::stdout),
        Console::Stderr => BoxMakeWriter::new(std::io::stderr),
    };
    let console_layer = fmt::layer()
        .with_writer(console_writer)
        .with_target(false)
        .with_ansi(config.console == Console::Stdout);

    let installed = tracing_subscriber::registry()
        .with(level_filter(&config.level))
        .with(console_layer)
        .with(file_layer)
        .try_init();
    if installed.is_err() {
        tracing::debug!("Global subscriber already set, keeping it");
    }

    Ok(LoggerGuard { _file: file_guard })
}

/// Parse `level` as filter directives, falling back to `info` when they are
/// malformed.
fn level_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(level).unwrap_or_else(|e| {
        eprintln!("Ignoring invalid log filter {level:?} ({e}), using {FALLBACK_LEVEL}");
        EnvFilter::new(FALLBACK_LEVEL)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn test_level_filter_accepts_directives() {
        assert_eq!(level_filter("debug").max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(
            level_filter("warn,eventchat_gateway=trace").max_level_hint(),
            Some(LevelFilter::TRACE)
        );
    }

    #[test]
    fn test_malformed_level_falls_back_to_info() {
        assert_eq!(level_filter("eventchat=loud").max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn test_stderr_config_has_no_file() {
        let config = LoggerConfig::stderr("info");
        assert_eq!(config.console, Console::Stderr);
        assert!(config.log_dir.is_none());

        let config = LoggerConfig::stdout("debug").with_log_dir("logs");
        assert_eq!(config.console, Console::Stdout);
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
    }
}
