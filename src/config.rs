//! Runtime configuration.
//!
//! Loaded from an optional TOML file; every field has a default so an empty
//! file (or no file at all) is valid. CLI flags are applied on top by
//! [`crate::cli::Args::apply_to`].
//!
//! ```toml
//! api_url = "https://webexapis.com/v1"
//! events_url = "wss://events.example.com/v1/stream"
//! initial_fetch = 30
//! log_filter = "read_status=info"
//!
//! [http]
//! connect_timeout_ms = 3000
//! request_timeout_ms = 10000
//!
//! [events]
//! intake_capacity = 1024
//! reconnect_base_ms = 500
//! reconnect_max_ms = 30000
//! ```

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{ReadStatusError, Result};
use crate::session::DEFAULT_INITIAL_FETCH;

pub const DEFAULT_API_URL: &str = "https://webexapis.com/v1";
pub const DEFAULT_EVENTS_URL: &str = "wss://webexapis.com/v1/events";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub api_url: String,
    pub events_url: String,
    /// Bearer token. Usually supplied through the environment instead.
    pub access_token: Option<String>,
    /// Size of the first page of spaces.
    pub initial_fetch: usize,
    pub log_filter: String,
    pub http: HttpConfig,
    pub events: EventsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_url: DEFAULT_API_URL.to_string(),
            events_url: DEFAULT_EVENTS_URL.to_string(),
            access_token: None,
            initial_fetch: DEFAULT_INITIAL_FETCH,
            log_filter: "read_status=info".to_string(),
            http: HttpConfig::default(),
            events: EventsConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub connect_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            connect_timeout_ms: 3_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl HttpConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EventsConfig {
    /// Capacity of the shared intake queue.
    pub intake_capacity: usize,
    pub reconnect_base_ms: u64,
    pub reconnect_max_ms: u64,
}

impl Default for EventsConfig {
    fn default() -> Self {
        EventsConfig {
            intake_capacity: 1024,
            reconnect_base_ms: 500,
            reconnect_max_ms: 30_000,
        }
    }
}

impl Config {
    /// Read and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ReadStatusError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_fetch == 0 {
            return Err(ReadStatusError::Config("initial_fetch must be at least 1".into()));
        }
        if self.api_url.trim().is_empty() {
            return Err(ReadStatusError::Config("api_url is empty".into()));
        }
        if self.events_url.trim().is_empty() {
            return Err(ReadStatusError::Config("events_url is empty".into()));
        }
        if self.events.intake_capacity == 0 {
            return Err(ReadStatusError::Config("events.intake_capacity must be at least 1".into()));
        }
        if self.events.reconnect_base_ms > self.events.reconnect_max_ms {
            return Err(ReadStatusError::Config(
                "events.reconnect_base_ms exceeds events.reconnect_max_ms".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_file_uses_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.initial_fetch, 30);
    }

    #[test]
    fn nested_tables_override_defaults() {
        let config = Config::from_toml_str(
            r#"
            initial_fetch = 5
            [http]
            request_timeout_ms = 2500
            [events]
            intake_capacity = 16
            "#,
        )
        .unwrap();
        assert_eq!(config.initial_fetch, 5);
        assert_eq!(config.http.request_timeout(), Duration::from_millis(2500));
        assert_eq!(config.http.connect_timeout_ms, 3_000);
        assert_eq!(config.events.intake_capacity, 16);
    }

    #[test]
    fn default_config_validates() {
        tokio_test::assert_ok!(Config::default().validate());
        let mut config = Config::default();
        config.events.reconnect_base_ms = config.events.reconnect_max_ms + 1;
        tokio_test::assert_err!(config.validate());
    }

    #[test]
    fn zero_initial_fetch_is_rejected() {
        let err = Config::from_toml_str("initial_fetch = 0").unwrap_err();
        assert!(matches!(err, ReadStatusError::Config(_)));
    }

    #[test]
    fn empty_url_is_rejected() {
        assert!(Config::from_toml_str("api_url = \"\"").is_err());
        assert!(Config::from_toml_str("events_url = \"  \"").is_err());
    }

    #[test]
    fn unknown_key_is_a_config_error() {
        let err = Config::from_toml_str("intial_fetch = 3").unwrap_err();
        assert!(matches!(err, ReadStatusError::Config(_)));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "api_url = \"http://localhost:9000\"").unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.api_url, "http://localhost:9000");
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load(&dir.path().join("absent.toml")).unwrap_err();
        assert!(matches!(err, ReadStatusError::Config(_)));
    }
}
