//! Server settings.
//!
//! Loading flow:
//! 1. Start with compiled [`ServerSettings::default()`]
//! 2. Apply `AMA_*` environment variable overrides (a `.env` file, if the
//!    binary loaded one, has already been merged into the environment)
//!
//! Invalid values are ignored and reported back so the caller can log them
//! once tracing is up.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for the AMA server.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Allowed CORS origin. `None` allows any origin.
    pub cors_origin: Option<String>,
    /// SQLite database file.
    pub database_path: PathBuf,
    /// Live subscribers admitted per room before new subscribes are refused.
    pub max_subscribers_per_room: usize,
    /// Outbound frames buffered per subscriber before sends start failing.
    pub outbound_queue: usize,
    /// Seconds between server-initiated Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds of client silence before the connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Default log level.
    pub log_level: String,
    /// Emit JSON logs.
    pub log_json: bool,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 8080,
            cors_origin: None,
            database_path: PathBuf::from("ama.db"),
            max_subscribers_per_room: 1000,
            outbound_queue: 64,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            log_level: "info".into(),
            log_json: false,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

impl ServerSettings {
    /// Defaults overlaid with the process environment.
    ///
    /// Returns the settings plus the names of variables that were present
    /// but rejected.
    pub fn from_env() -> (Self, Vec<String>) {
        let mut settings = Self::default();
        let rejected = settings.apply_overrides(|key| std::env::var(key).ok());
        (settings, rejected)
    }

    /// Apply `AMA_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Vec<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut rejected = Vec::new();
        let read = |key: &'static str| -> Option<String> {
            lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
        };

        if let Some(v) = read("AMA_API_HOST") {
            self.host = v;
        }
        if let Some(v) = read("AMA_API_PORT") {
            match v.parse::<u16>() {
                Ok(port) => self.port = port,
                Err(_) => rejected.push("AMA_API_PORT".to_string()),
            }
        }
        if let Some(v) = read("AMA_API_CORS_ORIGIN") {
            self.cors_origin = Some(v);
        }
        if let Some(v) = read("AMA_DATABASE_PATH") {
            self.database_path = PathBuf::from(v);
        }
        if let Some(v) = read("AMA_MAX_SUBSCRIBERS_PER_ROOM") {
            match parse_ranged(&v, 1, 1_000_000) {
                Some(n) => self.max_subscribers_per_room = n as usize,
                None => rejected.push("AMA_MAX_SUBSCRIBERS_PER_ROOM".to_string()),
            }
        }
        if let Some(v) = read("AMA_OUTBOUND_QUEUE") {
            match parse_ranged(&v, 1, 65_536) {
                Some(n) => self.outbound_queue = n as usize,
                None => rejected.push("AMA_OUTBOUND_QUEUE".to_string()),
            }
        }
        if let Some(v) = read("AMA_HEARTBEAT_INTERVAL_SECS") {
            match parse_ranged(&v, 1, 3600) {
                Some(n) => self.heartbeat_interval_secs = n,
                None => rejected.push("AMA_HEARTBEAT_INTERVAL_SECS".to_string()),
            }
        }
        if let Some(v) = read("AMA_HEARTBEAT_TIMEOUT_SECS") {
            match parse_ranged(&v, 1, 3600) {
                Some(n) => self.heartbeat_timeout_secs = n,
                None => rejected.push("AMA_HEARTBEAT_TIMEOUT_SECS".to_string()),
            }
        }
        if let Some(v) = read("AMA_LOG_LEVEL") {
            self.log_level = v.to_lowercase();
        }
        if let Some(v) = read("AMA_LOG_JSON") {
            match parse_bool(&v) {
                Some(b) => self.log_json = b,
                None => rejected.push("AMA_LOG_JSON".to_string()),
            }
        }

        rejected
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.outbound_queue == 0 {
            return Err(ConfigError::InvalidValue("outbound_queue must be at least 1".into()));
        }
        if self.max_subscribers_per_room == 0 {
            return Err(ConfigError::InvalidValue(
                "max_subscribers_per_room must be at least 1".into(),
            ));
        }
        if self.heartbeat_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "heartbeat_interval_secs must be at least 1".into(),
            ));
        }
        if self.heartbeat_timeout_secs <= self.heartbeat_interval_secs {
            return Err(ConfigError::InvalidValue(format!(
                "heartbeat_timeout_secs ({}) must exceed heartbeat_interval_secs ({})",
                self.heartbeat_timeout_secs, self.heartbeat_interval_secs
            )));
        }
        Ok(())
    }

    /// `host:port` for binding.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_ranged(raw: &str, min: u64, max: u64) -> Option<u64> {
    raw.parse::<u64>().ok().filter(|n| (min..=max).contains(n))
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
