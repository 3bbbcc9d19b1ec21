//! Configuration loading, validation, and management for tierbot.
//!
//! Loads configuration from `~/.tierbot/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tierbot_core::tier::User;
use tierbot_core::tool::ToolOverride;

/// The root configuration structure.
///
/// Maps directly to `~/.tierbot/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Model endpoint used as the decision step
    #[serde(default)]
    pub decision: DecisionConfig,

    /// Dispatch loop limits
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Subscription lookup settings and seed users
    #[serde(default)]
    pub subscription: SubscriptionConfig,

    /// Per-tool gating overrides (tool name → override)
    #[serde(default)]
    pub tools: HashMap<String, ToolOverride>,

    /// Outbound payload shaping
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// Where conversation history is kept between runs
    #[serde(default)]
    pub conversations: ConversationsConfig,

    /// Log output settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    /// "openai", "openrouter", "ollama" or "custom"
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    /// Explicit base URL (required for "custom")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// HTTP timeout for one model call
    #[serde(default = "default_decision_timeout")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_decision_timeout() -> u64 {
    60
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for DecisionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecisionConfig")
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_url: None,
            api_key: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_decision_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Maximum tool-execution rounds per inbound message
    #[serde(default = "default_max_round_trips")]
    pub max_round_trips: u32,

    /// Turns of history sent to the decision step
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Wall-clock budget for a whole dispatch cycle
    #[serde(default = "default_cycle_timeout")]
    pub cycle_timeout_secs: u64,

    /// Budget for a single tool invocation
    #[serde(default = "default_tool_timeout")]
    pub tool_timeout_secs: u64,

    /// Pause before retrying a failed decision step
    #[serde(default = "default_retry_backoff")]
    pub decision_retry_backoff_ms: u64,

    /// Replaces the built-in base prompt (the tool section is still appended)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt_override: Option<String>,
}

fn default_max_round_trips() -> u32 {
    5
}
fn default_history_window() -> usize {
    20
}
fn default_cycle_timeout() -> u64 {
    90
}
fn default_tool_timeout() -> u64 {
    30
}
fn default_retry_backoff() -> u64 {
    500
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_round_trips: default_max_round_trips(),
            history_window: default_history_window(),
            cycle_timeout_secs: default_cycle_timeout(),
            tool_timeout_secs: default_tool_timeout(),
            decision_retry_backoff_ms: default_retry_backoff(),
            system_prompt_override: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Lookups slower than this resolve to the free tier
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_ms: u64,

    /// Seed records for the in-memory subscription store
    #[serde(default)]
    pub users: Vec<User>,
}

fn default_lookup_timeout() -> u64 {
    2000
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            lookup_timeout_ms: default_lookup_timeout(),
            users: vec![],
        }
    }
}

/// What to do with replies longer than the channel allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Send several ordered parts
    #[default]
    Split,
    /// Cut the reply and mark the cut with an ellipsis
    Truncate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    #[serde(default)]
    pub overflow: OverflowPolicy,
}

/// The messaging API's text body limit.
fn default_max_message_chars() -> usize {
    4096
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            max_message_chars: default_max_message_chars(),
            overflow: OverflowPolicy::default(),
        }
    }
}

/// Conversation persistence backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationBackend {
    /// Process-local; history is lost on exit
    #[default]
    Memory,
    /// JSON-lines files under `dir`
    File,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationsConfig {
    #[serde(default)]
    pub backend: ConversationBackend,

    /// Directory for the file backend (default `~/.tierbot/conversations`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.tierbot/config.toml).
    ///
    /// Also checks environment variables:
    /// - `TIERBOT_API_KEY` (highest priority), then `OPENAI_API_KEY`
    /// - `TIERBOT_PROVIDER`, `TIERBOT_MODEL`
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_env(&Self::config_dir().join("config.toml"))
    }

    /// Load from an explicit path, then apply environment overrides.
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;

        if config.decision.api_key.is_none() {
            config.decision.api_key = std::env::var("TIERBOT_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("TIERBOT_PROVIDER") {
            config.decision.provider = provider;
        }

        if let Ok(model) = std::env::var("TIERBOT_MODEL") {
            config.decision.model = model;
        }

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

        Self::from_toml(&content).map_err(|e| match e {
            ConfigError::ParseError { reason, .. } => ConfigError::ParseError {
                path: path.to_path_buf(),
                reason,
            },
            other => other,
        })
    }

    /// Parse and validate configuration text.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<inline>"),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".tierbot")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.decision.temperature < 0.0 || self.decision.temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "decision.temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.decision.provider == "custom" && self.decision.api_url.is_none() {
            return Err(ConfigError::ValidationError(
                "decision.api_url is required when provider = \"custom\"".into(),
            ));
        }

        if self.dispatch.max_round_trips == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.max_round_trips must be at least 1".into(),
            ));
        }

        if self.dispatch.history_window == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.history_window must be at least 1".into(),
            ));
        }

        if self.dispatch.cycle_timeout_secs == 0 || self.dispatch.tool_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch timeouts must be greater than zero".into(),
            ));
        }

        if self.outbound.max_message_chars < 16 {
            return Err(ConfigError::ValidationError(
                "outbound.max_message_chars must be at least 16".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for user in &self.subscription.users {
            if !seen.insert(user.id.as_str()) {
                return Err(ConfigError::ValidationError(format!(
                    "subscription.users contains '{}' more than once",
                    user.id
                )));
            }
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.decision.api_key.is_some()
    }

    /// Generate a default config TOML string (for `config --init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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
    use tierbot_core::tier::Tier;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.decision.provider, "openai");
        assert_eq!(config.dispatch.max_round_trips, 5);
        assert_eq!(config.outbound.max_message_chars, 4096);
        assert_eq!(config.outbound.overflow, OverflowPolicy::Split);
    }

    #[test]
    fn config_roundtrip_toml() {
        let toml_str = AppConfig::default_toml();
        let parsed = AppConfig::from_toml(&toml_str).unwrap();
        assert_eq!(parsed.decision.model, "gpt-4o");
        assert_eq!(parsed.dispatch.history_window, 20);
    }

    #[test]
    fn zero_round_trips_rejected() {
        let mut config = AppConfig::default();
        config.dispatch.max_round_trips = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn invalid_temperature_rejected() {
        let mut config = AppConfig::default();
        config.decision.temperature = 5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn custom_provider_needs_url() {
        let mut config = AppConfig::default();
        config.decision.provider = "custom".into();
        assert!(config.validate().is_err());
        config.decision.api_url = Some("http://localhost:8080/v1".into());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let config = AppConfig::load_from(Path::new("/nonexistent/config.toml")).unwrap();
        assert_eq!(config.decision.provider, "openai");
    }

    #[test]
    fn tool_overrides_and_users_parse() {
        let toml_str = r#"
[dispatch]
max_round_trips = 3

[tools.calculator]
min_tier = "pro"

[tools.echo]
enabled = false

[[subscription.users]]
id = "+15550001"
tier = "pro"

[[subscription.users]]
id = "+15550002"
tier = "plus"
active = false

[outbound]
max_message_chars = 1600
overflow = "truncate"

[conversations]
backend = "file"
dir = "/var/lib/tierbot"
"#;
        let config = AppConfig::from_toml(toml_str).unwrap();
        assert_eq!(config.dispatch.max_round_trips, 3);
        assert_eq!(config.tools["calculator"].min_tier, Some(Tier::Pro));
        assert_eq!(config.tools["echo"].enabled, Some(false));
        assert_eq!(config.subscription.users.len(), 2);
        assert!(!config.subscription.users[1].active);
        assert!(config.subscription.users[0].active);
        assert_eq!(config.subscription.users[0].tier, Tier::Pro);
        assert_eq!(config.outbound.overflow, OverflowPolicy::Truncate);
        assert_eq!(config.conversations.backend, ConversationBackend::File);
        assert_eq!(
            config.conversations.dir.as_deref(),
            Some(Path::new("/var/lib/tierbot"))
        );
    }

    #[test]
    fn unknown_tier_in_config_is_a_parse_error() {
        let toml_str = r#"
[tools.calculator]
min_tier = "gold"
"#;
        assert!(matches!(
            AppConfig::from_toml(toml_str),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn duplicate_seed_users_rejected() {
        let toml_str = r#"
[[subscription.users]]
id = "a"
tier = "pro"

[[subscription.users]]
id = "a"
tier = "free"
"#;
        assert!(matches!(
            AppConfig::from_toml(toml_str),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn load_from_file_reports_path_on_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[dispatch\nbroken").unwrap();
        let err = AppConfig::load_from(file.path()).unwrap_err();
        match err {
            ConfigError::ParseError { path, .. } => assert_eq!(path, file.path()),
            other => panic!("Expected ParseError, got {other:?}"),
        }
    }

    #[test]
    fn load_from_file_reads_values() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[decision]\nmodel = \"gpt-4o-mini\"").unwrap();
        let config = AppConfig::load_from(file.path()).unwrap();
        assert_eq!(config.decision.model, "gpt-4o-mini");
    }

    #[test]
    fn debug_output_redacts_api_key() {
        let mut config = AppConfig::default();
        config.decision.api_key = Some("sk-secret".into());
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
