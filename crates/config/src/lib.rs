//! Configuration loading, validation, and management for Qalam.
//!
//! Loads configuration from `~/.qalam/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.qalam/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Session store limits and expiry
    #[serde(default)]
    pub sessions: SessionConfig,

    /// Instruction memory settings
    #[serde(default)]
    pub instructions: InstructionConfig,

    /// Background extraction settings
    #[serde(default)]
    pub extraction: ExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sliding expiration window in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Maximum live sessions before LRU eviction kicks in
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,

    #[serde(default = "default_max_messages")]
    pub max_messages: usize,

    #[serde(default = "default_max_revisions")]
    pub max_revisions: usize,

    /// How often the background sweep runs
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_ttl_secs() -> u64 {
    30 * 60
}
fn default_max_sessions() -> usize {
    1000
}
fn default_max_messages() -> usize {
    20
}
fn default_max_revisions() -> usize {
    10
}
fn default_sweep_interval_secs() -> u64 {
    5 * 60
}

impl SessionConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_sessions: default_max_sessions(),
            max_messages: default_max_messages(),
            max_revisions: default_max_revisions(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstructionConfig {
    /// "file", "memory" or "none"
    #[serde(default = "default_instruction_backend")]
    pub backend: String,

    /// Snapshot location for the file backend (defaults under the config dir)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    #[serde(default = "default_merge_threshold")]
    pub merge_threshold: f64,

    #[serde(default = "default_sequence_weight")]
    pub sequence_weight: f64,

    #[serde(default = "default_token_weight")]
    pub token_weight: f64,

    /// "prefer_longer", "keep_existing" or "prefer_newest"
    #[serde(default = "default_text_policy")]
    pub text_policy: String,

    #[serde(default = "default_prompt_max_items")]
    pub prompt_max_items: usize,

    /// `compact` drops records used fewer times than this...
    #[serde(default = "default_compact_min_usage")]
    pub compact_min_usage: u64,

    /// ...and idle for longer than this many days
    #[serde(default = "default_compact_max_idle_days")]
    pub compact_max_idle_days: u64,
}

fn default_instruction_backend() -> String {
    "file".into()
}
fn default_merge_threshold() -> f64 {
    0.85
}
fn default_sequence_weight() -> f64 {
    0.6
}
fn default_token_weight() -> f64 {
    0.4
}
fn default_text_policy() -> String {
    "prefer_longer".into()
}
fn default_prompt_max_items() -> usize {
    10
}
fn default_compact_min_usage() -> u64 {
    2
}
fn default_compact_max_idle_days() -> u64 {
    90
}

impl InstructionConfig {
    /// Resolved snapshot path for the file backend.
    pub fn snapshot_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| AppConfig::config_dir().join("instructions.json"))
    }
}

impl Default for InstructionConfig {
    fn default() -> Self {
        Self {
            backend: default_instruction_backend(),
            path: None,
            merge_threshold: default_merge_threshold(),
            sequence_weight: default_sequence_weight(),
            token_weight: default_token_weight(),
            text_policy: default_text_policy(),
            prompt_max_items: default_prompt_max_items(),
            compact_min_usage: default_compact_min_usage(),
            compact_max_idle_days: default_compact_max_idle_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Hard bound on one extractor call
    #[serde(default = "default_extraction_timeout_secs")]
    pub timeout_secs: u64,

    /// Recent messages handed to the extractor as context
    #[serde(default = "default_context_messages")]
    pub context_messages: usize,
}

fn default_true() -> bool {
    true
}
fn default_extraction_timeout_secs() -> u64 {
    5
}
fn default_context_messages() -> usize {
    4
}

impl ExtractionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_secs: default_extraction_timeout_secs(),
            context_messages: default_context_messages(),
        }
    }
}

/// Upper bound on `sessions.ttl_secs` (one year).
pub const MAX_TTL_SECS: u64 = 365 * 24 * 60 * 60;

const TEXT_POLICIES: [&str; 3] = ["prefer_longer", "keep_existing", "prefer_newest"];
const INSTRUCTION_BACKENDS: [&str; 3] = ["file", "memory", "none"];

impl AppConfig {
    /// Load configuration from the default path (~/.qalam/config.toml).
    ///
    /// Environment variables override file values:
    /// - `QALAM_SESSION_TTL_SECS`
    /// - `QALAM_MAX_SESSIONS`
    /// - `QALAM_MERGE_THRESHOLD`
    /// - `QALAM_INSTRUCTIONS_PATH`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(ttl) = env_parse::<u64>("QALAM_SESSION_TTL_SECS")? {
            self.sessions.ttl_secs = ttl;
        }
        if let Some(max) = env_parse::<usize>("QALAM_MAX_SESSIONS")? {
            self.sessions.max_sessions = max;
        }
        if let Some(threshold) = env_parse::<f64>("QALAM_MERGE_THRESHOLD")? {
            self.instructions.merge_threshold = threshold;
        }
        if let Ok(path) = std::env::var("QALAM_INSTRUCTIONS_PATH") {
            self.instructions.path = Some(PathBuf::from(path));
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".qalam")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let s = &self.sessions;
        if s.ttl_secs == 0 || s.ttl_secs > MAX_TTL_SECS {
            return Err(ConfigError::ValidationError(format!(
                "sessions.ttl_secs must be in 1..={MAX_TTL_SECS}"
            )));
        }
        if s.max_messages == 0 || s.max_revisions == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.max_messages and sessions.max_revisions must be >= 1".into(),
            ));
        }
        if s.sweep_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "sessions.sweep_interval_secs must be >= 1".into(),
            ));
        }

        let i = &self.instructions;
        if !(i.merge_threshold > 0.0 && i.merge_threshold <= 1.0) {
            return Err(ConfigError::ValidationError(
                "instructions.merge_threshold must be in (0, 1]".into(),
            ));
        }
        if i.sequence_weight < 0.0 || i.token_weight < 0.0 {
            return Err(ConfigError::ValidationError(
                "similarity weights must be non-negative".into(),
            ));
        }
        if i.sequence_weight + i.token_weight <= 0.0 {
            return Err(ConfigError::ValidationError(
                "sequence_weight + token_weight must be > 0".into(),
            ));
        }
        if !TEXT_POLICIES.contains(&i.text_policy.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "instructions.text_policy must be one of {TEXT_POLICIES:?}, got '{}'",
                i.text_policy
            )));
        }
        if !INSTRUCTION_BACKENDS.contains(&i.backend.as_str()) {
            return Err(ConfigError::ValidationError(format!(
                "instructions.backend must be one of {INSTRUCTION_BACKENDS:?}, got '{}'",
                i.backend
            )));
        }

        if self.extraction.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "extraction.timeout_secs must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for the `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::ValidationError(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sessions.max_messages, 20);
        assert_eq!(config.sessions.max_revisions, 10);
        assert_eq!(config.sessions.sweep_interval_secs, 300);
        assert_eq!(config.instructions.merge_threshold, 0.85);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.sessions.ttl_secs, config.sessions.ttl_secs);
        assert_eq!(parsed.instructions.text_policy, "prefer_longer");
    }

    #[test]
    fn partial_file_fills_defaults() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            tmp,
            r#"
[sessions]
ttl_secs = 60

[instructions]
merge_threshold = 0.9
"#
        )
        .unwrap();

        let config = AppConfig::load_from(tmp.path()).unwrap();
        assert_eq!(config.sessions.ttl_secs, 60);
        assert_eq!(config.sessions.max_sessions, 1000);
        assert_eq!(config.instructions.merge_threshold, 0.9);
        assert_eq!(config.instructions.sequence_weight, 0.6);
        assert!(config.extraction.enabled);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.instructions.merge_threshold = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_weights_rejected() {
        let mut config = AppConfig::default();
        config.instructions.sequence_weight = 0.0;
        config.instructions.token_weight = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn unknown_text_policy_rejected() {
        let mut config = AppConfig::default();
        config.instructions.text_policy = "prefer_shorter".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("prefer_shorter"));
    }

    #[test]
    fn zero_message_cap_rejected() {
        let mut config = AppConfig::default();
        config.sessions.max_messages = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.sessions.ttl_secs, 1800);
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        writeln!(tmp, "[sessions\nttl_secs = ").unwrap();
        let err = AppConfig::load_from(tmp.path()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("merge_threshold"));
        assert!(toml_str.contains("prefer_longer"));
    }

    #[test]
    fn snapshot_path_prefers_explicit_setting() {
        let mut config = InstructionConfig::default();
        assert!(config.snapshot_path().ends_with("instructions.json"));
        config.path = Some(PathBuf::from("/data/qalam.json"));
        assert_eq!(config.snapshot_path(), PathBuf::from("/data/qalam.json"));
    }
}
