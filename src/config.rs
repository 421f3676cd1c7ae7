//! Configuration file parser for the sync daemon.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde but logged as a warning, since they are
//! usually typos.
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::feed::{FetchOptions, DEFAULT_MAX_FEED_BYTES};
use crate::schedule::SchedulerSettings;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file exceeds maximum allowed size.
    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level daemon configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Minutes between scheduled batch refreshes.
    pub refresh_interval_minutes: u64,

    /// Hours between retention cleanup runs.
    pub cleanup_interval_hours: u64,

    /// Read articles older than this many days are deleted.
    pub retention_days: u64,

    /// Hard cap on a scheduled refresh run.
    pub job_deadline_secs: u64,

    /// A reconnect within this many minutes of a successful refresh does not
    /// trigger another one.
    pub quiet_period_minutes: u64,

    pub connect_timeout_secs: u64,
    pub request_timeout_secs: u64,

    /// Feeds fetched at the same time during a batch.
    pub max_concurrent_fetches: usize,

    /// Response bodies larger than this are rejected.
    pub max_feed_bytes: usize,

    pub user_agent: String,

    /// `host:port` probed to detect connectivity. Unset means always online.
    pub connectivity_probe: Option<String>,

    pub probe_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            refresh_interval_minutes: 15,
            cleanup_interval_hours: 24,
            retention_days: 30,
            job_deadline_secs: 25,
            quiet_period_minutes: 5,
            connect_timeout_secs: 30,
            request_timeout_secs: 60,
            max_concurrent_fetches: 4,
            max_feed_bytes: DEFAULT_MAX_FEED_BYTES,
            user_agent: concat!("feedsync/", env!("CARGO_PKG_VERSION")).to_string(),
            connectivity_probe: None,
            probe_interval_secs: 30,
        }
    }
}

const KNOWN_KEYS: &[&str] = &[
    "refresh_interval_minutes",
    "cleanup_interval_hours",
    "retention_days",
    "job_deadline_secs",
    "quiet_period_minutes",
    "connect_timeout_secs",
    "request_timeout_secs",
    "max_concurrent_fetches",
    "max_feed_bytes",
    "user_agent",
    "connectivity_probe",
    "probe_interval_secs",
];

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → accepted, logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                // Deleted between metadata and read
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        Self::parse(&content)
    }

    /// Parse configuration from TOML text.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        if let Ok(raw) = content.parse::<toml::Table>() {
            for key in raw.keys() {
                if !KNOWN_KEYS.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(content)?;
        tracing::info!(
            refresh_interval_minutes = config.refresh_interval_minutes,
            max_concurrent_fetches = config.max_concurrent_fetches,
            "Loaded configuration"
        );
        Ok(config)
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            max_bytes: self.max_feed_bytes,
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            refresh_interval: Duration::from_secs(self.refresh_interval_minutes.saturating_mul(60)),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_hours.saturating_mul(3600)),
            refresh_deadline: Duration::from_secs(self.job_deadline_secs),
            retention: Duration::from_secs(self.retention_days.saturating_mul(86_400)),
        }
    }

    pub fn quiet_period(&self) -> Duration {
        Duration::from_secs(self.quiet_period_minutes.saturating_mul(60))
    }

    pub fn probe_interval(&self) -> Duration {
        Duration::from_secs(self.probe_interval_secs.max(1))
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config_matches_engine_constants() {
        let config = Config::default();
        assert_eq!(config.retention_days, 30);
        assert_eq!(config.job_deadline_secs, 25);
        assert_eq!(config.quiet_period(), Duration::from_secs(300));
        assert_eq!(config.scheduler_settings().refresh_deadline, Duration::from_secs(25));
        assert!(config.connectivity_probe.is_none());
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/feedsync_test_nonexistent_config.toml");
        assert_eq!(Config::load(path).unwrap(), Config::default());
    }

    #[test]
    fn test_whitespace_only_returns_default() {
        assert_eq!(Config::parse("   \n  \n  ").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let config = Config::parse("max_concurrent_fetches = 8\n").unwrap();
        assert_eq!(config.max_concurrent_fetches, 8);
        assert_eq!(config.refresh_interval_minutes, 15);
    }

    #[test]
    fn test_full_config() {
        let content = r#"
refresh_interval_minutes = 60
cleanup_interval_hours = 12
retention_days = 7
job_deadline_secs = 10
quiet_period_minutes = 1
connect_timeout_secs = 5
request_timeout_secs = 20
max_concurrent_fetches = 2
max_feed_bytes = 1024
user_agent = "test-agent"
connectivity_probe = "1.1.1.1:443"
probe_interval_secs = 15
"#;
        let config = Config::parse(content).unwrap();
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.connectivity_probe.as_deref(), Some("1.1.1.1:443"));

        let fetch = config.fetch_options();
        assert_eq!(fetch.connect_timeout, Duration::from_secs(5));
        assert_eq!(fetch.max_bytes, 1024);
        assert_eq!(fetch.user_agent, "test-agent");

        let settings = config.scheduler_settings();
        assert_eq!(settings.refresh_interval, Duration::from_secs(3600));
        assert_eq!(settings.retention, Duration::from_secs(7 * 86_400));
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let err = Config::parse("this is not [valid toml").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("Invalid TOML"));
    }

    #[test]
    fn test_unknown_keys_accepted() {
        let config = Config::parse("retention_days = 3\ntotally_fake_key = 1\n").unwrap();
        assert_eq!(config.retention_days, 3);
    }

    #[test]
    fn test_wrong_type_returns_error() {
        assert!(Config::parse("retention_days = \"forever\"\n").is_err());
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("feedsync_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "a".repeat(1_048_577)).unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::TooLarge(_)));
        assert!(err.to_string().contains("too large"));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_from_file() {
        let dir = std::env::temp_dir().join("feedsync_config_test_load");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "probe_interval_secs = 0\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.probe_interval(), Duration::from_secs(1));

        std::fs::remove_dir_all(&dir).ok();
    }
}
