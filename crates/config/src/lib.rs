//! Configuration loading, validation, and management for rustact.
//!
//! Loads configuration from `~/.rustact/config.toml` with environment
//! variable overrides. Validates all settings at startup. The resulting
//! [`AppConfig`] is a plain value passed into constructors; nothing in the
//! agent reads configuration from ambient global state.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.rustact/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key for the completion endpoint
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier sent with every request
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per model response
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_response_tokens: Option<u32>,

    /// Directory the file and shell tools operate in (defaults to cwd)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<PathBuf>,

    /// Language the final answer should be written in
    #[serde(default = "default_language")]
    pub language: String,

    /// Agent loop limits
    #[serde(default)]
    pub agent: AgentSettings,

    /// Context window budget
    #[serde(default)]
    pub context: ContextSettings,

    /// Tool execution limits
    #[serde(default)]
    pub tools: ToolSettings,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_language() -> String {
    "English".into()
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_response_tokens", &self.max_response_tokens)
            .field("work_dir", &self.work_dir)
            .field("language", &self.language)
            .field("agent", &self.agent)
            .field("context", &self.context)
            .field("tools", &self.tools)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum model turns per task
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Retries for transient completion failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_initial_delay_ms")]
    pub retry_initial_delay_ms: u64,

    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,
}

fn default_max_steps() -> usize {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_initial_delay_ms() -> u64 {
    500
}
fn default_retry_max_delay_ms() -> u64 {
    8_000
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            max_retries: default_max_retries(),
            retry_initial_delay_ms: default_retry_initial_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextSettings {
    /// Token budget for the retained conversation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,

    /// Headroom kept free below `max_tokens` after pruning
    #[serde(default = "default_safety_margin")]
    pub safety_margin: usize,

    /// Single-message size ceiling, in characters
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,

    /// Fixed token cost added to every message
    #[serde(default = "default_per_message_overhead")]
    pub per_message_overhead: usize,
}

fn default_max_tokens() -> usize {
    128_000
}
fn default_safety_margin() -> usize {
    4_096
}
fn default_max_message_chars() -> usize {
    100_000
}
fn default_per_message_overhead() -> usize {
    4
}

impl Default for ContextSettings {
    fn default() -> Self {
        Self {
            max_tokens: default_max_tokens(),
            safety_margin: default_safety_margin(),
            max_message_chars: default_max_message_chars(),
            per_message_overhead: default_per_message_overhead(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSettings {
    /// Wall-clock limit for a single tool execution
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// How long a cancelled tool may keep running before it is aborted
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,

    /// Observation size ceiling, in bytes
    #[serde(default = "default_max_observation_chars")]
    pub max_observation_chars: usize,

    /// Cap on entries returned by ListFiles
    #[serde(default = "default_max_list_entries")]
    pub max_list_entries: usize,

    /// Cap on matching lines returned by SearchInFiles
    #[serde(default = "default_max_search_results")]
    pub max_search_results: usize,

    /// Cap on paths returned by FindFiles
    #[serde(default = "default_max_find_results")]
    pub max_find_results: usize,
}

fn default_timeout_secs() -> u64 {
    300
}
fn default_cancel_grace_ms() -> u64 {
    2_000
}
fn default_max_observation_chars() -> usize {
    16_000
}
fn default_max_list_entries() -> usize {
    500
}
fn default_max_search_results() -> usize {
    50
}
fn default_max_find_results() -> usize {
    100
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            cancel_grace_ms: default_cancel_grace_ms(),
            max_observation_chars: default_max_observation_chars(),
            max_list_entries: default_max_list_entries(),
            max_search_results: default_max_search_results(),
            max_find_results: default_max_find_results(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.rustact/config.toml).
    ///
    /// Environment variables take priority over the file:
    /// - `RUSTACT_API_KEY`, then `OPENAI_API_KEY`
    /// - `OPENAI_BASE_URL`
    /// - `RUSTACT_MODEL`
    /// - `RUSTACT_WORK_DIR`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_path();
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
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

    /// Apply overrides from a variable lookup (the process environment in
    /// [`AppConfig::load`]). Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = var("RUSTACT_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            self.api_key = Some(key);
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.base_url = url;
        }
        if let Some(model) = var("RUSTACT_MODEL") {
            self.model = model;
        }
        if let Some(dir) = var("RUSTACT_WORK_DIR") {
            self.work_dir = Some(PathBuf::from(dir));
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".rustact")
    }

    /// Get the configuration file path.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// The directory tools operate in: the configured one, else the cwd.
    pub fn resolved_work_dir(&self) -> PathBuf {
        match &self.work_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be > 0".into(),
            ));
        }

        if self.context.safety_margin >= self.context.max_tokens {
            return Err(ConfigError::ValidationError(
                "context.safety_margin must be smaller than context.max_tokens".into(),
            ));
        }

        if self.tools.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.timeout_secs must be > 0".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for the `init` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_response_tokens: None,
            work_dir: None,
            language: default_language(),
            agent: AgentSettings::default(),
            context: ContextSettings::default(),
            tools: ToolSettings::default(),
        }
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

impl From<ConfigError> for rustact_core::Error {
    fn from(err: ConfigError) -> Self {
        rustact_core::Error::Config {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.agent.max_steps, 30);
        assert_eq!(config.context.max_tokens, 128_000);
        assert_eq!(config.tools.timeout_secs, 300);
    }

    #[test]
    fn config_roundtrip_toml() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: AppConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.model, config.model);
        assert_eq!(parsed.context.safety_margin, config.context.safety_margin);
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
model = "qwen/qwen3-coder"

[context]
max_tokens = 100
safety_margin = 10
"#,
        )
        .unwrap();
        assert_eq!(config.model, "qwen/qwen3-coder");
        assert_eq!(config.context.max_tokens, 100);
        assert_eq!(config.context.per_message_overhead, 4);
        assert_eq!(config.tools.cancel_grace_ms, 2_000);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let config = AppConfig {
            temperature: 5.0,
            ..AppConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn safety_margin_must_fit_budget() {
        let mut config = AppConfig::default();
        config.context.max_tokens = 100;
        config.context.safety_margin = 100;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("safety_margin"));
    }

    #[test]
    fn zero_steps_rejected() {
        let mut config = AppConfig::default();
        config.agent.max_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn missing_config_file_returns_defaults() {
        let result = AppConfig::load_from(Path::new("/nonexistent/config.toml"));
        let config = result.unwrap();
        assert_eq!(config.model, default_model());
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "model = [unclosed").unwrap();
        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { .. }));
    }

    #[test]
    fn env_overrides_take_priority() {
        let vars: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-openai"),
            ("RUSTACT_API_KEY", "sk-rustact"),
            ("RUSTACT_MODEL", "local-model"),
            ("OPENAI_BASE_URL", ""),
        ]
        .into_iter()
        .collect();
        let mut config = AppConfig::default();
        config.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.api_key.as_deref(), Some("sk-rustact"));
        assert_eq!(config.model, "local-model");
        assert_eq!(config.base_url, default_base_url(), "empty value ignored");
    }

    #[test]
    fn debug_redacts_api_key() {
        let config = AppConfig {
            api_key: Some("sk-secret".into()),
            ..AppConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn default_toml_generation() {
        let toml_str = AppConfig::default_toml();
        assert!(toml_str.contains("[agent]"));
        assert!(toml_str.contains("max_steps = 30"));
        assert!(toml_str.contains("128000"));
        assert!(toml_str.contains("max_search_results = 50"));
    }
}
