//! Configuration for keytally.

use crate::core::buckets::BucketCalendar;
use crate::core::session::IdleCaps;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How often pending aggregates are flushed
    #[serde(with = "duration_serde")]
    pub flush_interval: Duration,

    /// Pending event count that forces an immediate flush
    pub flush_threshold: usize,

    /// Idle gap (monotonic) that closes a per-app typing session
    #[serde(with = "duration_serde")]
    pub session_timeout: Duration,

    /// Lenient idle cap for flow active time (seconds)
    pub idle_cap_flow_secs: f64,

    /// Strict idle cap for skill active time (seconds)
    pub idle_cap_skill_secs: f64,

    /// Raw events and hourly aggregates older than this are pruned
    pub retention_days: u32,

    /// IANA timezone used to align buckets
    pub timezone: String,

    /// Length of the top-keys and top-apps rankings
    pub top_n: usize,

    /// Sources excluded from word counting
    pub suppression: SuppressionConfig,

    /// Directory holding the database and transparency stats
    pub data_path: PathBuf,

    /// Whether collection is currently paused
    pub paused: bool,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keytally");

        Self {
            flush_interval: Duration::from_secs(5),
            flush_threshold: 200,
            session_timeout: Duration::from_secs(60),
            idle_cap_flow_secs: 12.0,
            idle_cap_skill_secs: 2.0,
            retention_days: 90,
            timezone: "UTC".to_string(),
            top_n: 10,
            suppression: SuppressionConfig::default(),
            data_path: data_dir,
            paused: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();

        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config_path = Self::config_path();

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(&config_path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("keytally")
            .join("config.json")
    }

    /// Path of the aggregate database.
    pub fn database_path(&self) -> PathBuf {
        self.data_path.join("keytally.sqlite3")
    }

    /// Path of the persisted transparency counters.
    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Resolve the configured timezone.
    pub fn calendar(&self) -> Result<BucketCalendar, ConfigError> {
        let tz: Tz = self
            .timezone
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("unknown timezone '{}'", self.timezone)))?;
        Ok(BucketCalendar::new(tz))
    }

    pub fn idle_caps(&self) -> IdleCaps {
        IdleCaps {
            flow: self.idle_cap_flow_secs,
            skill: self.idle_cap_skill_secs,
        }
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_threshold == 0 {
            return Err(ConfigError::Invalid("flush_threshold must be at least 1".into()));
        }
        if self.flush_interval.is_zero() {
            return Err(ConfigError::Invalid("flush_interval must be positive".into()));
        }
        if !(self.idle_cap_flow_secs > 0.0 && self.idle_cap_skill_secs > 0.0) {
            return Err(ConfigError::Invalid("idle caps must be positive".into()));
        }
        if self.retention_days == 0 {
            return Err(ConfigError::Invalid("retention_days must be at least 1".into()));
        }
        self.calendar()?;
        Ok(())
    }
}

/// Application identities whose keystrokes never count as typed words.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SuppressionConfig {
    pub bundle_id_suffixes: Vec<String>,
    pub bundle_id_fragments: Vec<String>,
    pub app_name_fragments: Vec<String>,
}

impl Default for SuppressionConfig {
    fn default() -> Self {
        Self {
            bundle_id_suffixes: vec![
                "com.apple.speechrecognitioncore".to_string(),
                ".dictation".to_string(),
            ],
            bundle_id_fragments: vec![
                "superwhisper".to_string(),
                "wispr".to_string(),
                "voiceink".to_string(),
            ],
            app_name_fragments: vec!["dictation".to_string(), "whisper".to_string()],
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serde support for Duration.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
