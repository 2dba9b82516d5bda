use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use eventchat_gateway::GatewayConfig;

/// Event chat relay configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// TCP bind address
    pub bind_address: String,
    /// TCP port
    pub port: u16,
    /// SQLite database path
    pub db_path: String,
    /// Directory for the rolling NDJSON log
    pub log_dir: String,
    /// Log level
    pub log_level: String,
    /// Longest accepted client line, in bytes
    pub max_frame_bytes: usize,
    /// Per-frame write deadline in seconds, 0 disables
    pub write_timeout_secs: u64,
    /// Read deadline between client frames in seconds, 0 disables
    pub idle_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            db_path: "eventchat.db".to_string(),
            log_dir: "logs".to_string(),
            log_level: "info".to_string(),
            max_frame_bytes: 64 * 1024,
            write_timeout_secs: 10,
            idle_timeout_secs: 0,
        }
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            bind_address: var("EVENTCHAT_BIND").unwrap_or(defaults.bind_address),
            port: parsed(&var, "EVENTCHAT_PORT").unwrap_or(defaults.port),
            db_path: var("EVENTCHAT_DB").unwrap_or(defaults.db_path),
            log_dir: var("EVENTCHAT_LOG_DIR").unwrap_or(defaults.log_dir),
            log_level: var("RUST_LOG").unwrap_or(defaults.log_level),
            max_frame_bytes: parsed(&var, "EVENTCHAT_MAX_FRAME_BYTES")
                .unwrap_or(defaults.max_frame_bytes),
            write_timeout_secs: parsed(&var, "EVENTCHAT_WRITE_TIMEOUT_SECS")
                .unwrap_or(defaults.write_timeout_secs),
            idle_timeout_secs: parsed(&var, "EVENTCHAT_IDLE_TIMEOUT_SECS")
                .unwrap_or(defaults.idle_timeout_secs),
        }
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address {:?}", self.bind_address))?;
        Ok(SocketAddr::new(ip, self.port))
    }

    pub fn gateway(&self) -> GatewayConfig {
        GatewayConfig {
            max_frame_bytes: self.max_frame_bytes,
            write_timeout: seconds(self.write_timeout_secs),
            idle_timeout: seconds(self.idle_timeout_secs),
        }
    }
}

fn parsed<T: FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    var(key).and_then(|v| v.trim().parse().ok())
}

fn seconds(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
