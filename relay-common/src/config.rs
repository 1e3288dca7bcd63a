//! Configuration management for the relay.
//!
//! The relay reads a single JSON file at `~/.chatrelay/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (`RELAY_*` prefix, plus `OPENAI_API_KEY`)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `RELAY_API_KEY` / `OPENAI_API_KEY` → llm.api_key
//! - `RELAY_BASE_URL` → llm.base_url
//! - `RELAY_MODEL` → llm.model
//! - `RELAY_DB_PATH` → storage.path
//! - `RELAY_LOG_LEVEL` → observability.log_level
//! - `RELAY_LOG_FORMAT` → observability.log_format

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".chatrelay"),
        |dirs| dirs.home_dir().join(".chatrelay"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// Remote completion service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible endpoint (without `/v1`)
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token for the endpoint
    #[serde(default)]
    pub api_key: Option<String>,

    /// Model used when a conversation has no override
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens the model may generate per answer
    #[serde(default = "default_max_tokens")]
    pub max_tokens: i64,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Number of transport-level retries before switching to a fallback
    #[serde(default = "default_retries")]
    pub retries: u32,

    /// Backoff time between retries in milliseconds
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,

    /// Fallback base URLs, tried in order when the primary keeps failing
    #[serde(default)]
    pub fallback_base_urls: Vec<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            model: default_model(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            retries: default_retries(),
            backoff_ms: default_backoff_ms(),
            fallback_base_urls: vec![],
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com".into()
}

fn default_model() -> String {
    "gpt-3.5-turbo".into()
}

fn default_max_tokens() -> i64 {
    2000
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_retries() -> u32 {
    2
}

fn default_backoff_ms() -> u64 {
    1000
}

// ============================================================================
// Context Configuration
// ============================================================================

/// History bounds and prompt defaults for the context manager.
///
/// Sizes are approximate: they count characters of the serialized history,
/// not model tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum number of history entries sent with a turn
    #[serde(default = "default_max_history_entries")]
    pub max_history_entries: usize,

    /// Approximate size ceiling for the history sent with a turn
    #[serde(default = "default_max_history_size")]
    pub max_history_size: usize,

    /// Target size for the dialogue summary produced on overflow
    #[serde(default = "default_condensed_budget")]
    pub condensed_budget: usize,

    /// Per-turn size above which a committed turn is compacted
    #[serde(default = "default_turn_memory_budget")]
    pub turn_memory_budget: usize,

    /// Longest query accepted from a user, in characters
    #[serde(default = "default_max_query_chars")]
    pub max_query_chars: usize,

    /// Style prompt stored for a conversation on first use
    #[serde(default = "default_style_prompt")]
    pub default_style_prompt: String,

    /// Sampling temperature for conversations without an override
    #[serde(default = "default_temperature")]
    pub default_temperature: f64,

    /// Sampling temperature for summarization calls
    #[serde(default = "default_summary_temperature")]
    pub summary_temperature: f64,

    /// Reply text when the model produced no answer
    #[serde(default = "default_no_answer_text")]
    pub no_answer_text: String,

    /// Reply text when the remote service failed
    #[serde(default = "default_remote_failure_text")]
    pub remote_failure_text: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_history_entries: default_max_history_entries(),
            max_history_size: default_max_history_size(),
            condensed_budget: default_condensed_budget(),
            turn_memory_budget: default_turn_memory_budget(),
            max_query_chars: default_max_query_chars(),
            default_style_prompt: default_style_prompt(),
            default_temperature: default_temperature(),
            summary_temperature: default_summary_temperature(),
            no_answer_text: default_no_answer_text(),
            remote_failure_text: default_remote_failure_text(),
        }
    }
}

fn default_max_history_entries() -> usize {
    10
}

fn default_max_history_size() -> usize {
    4000
}

fn default_condensed_budget() -> usize {
    1500
}

fn default_turn_memory_budget() -> usize {
    1000
}

fn default_max_query_chars() -> usize {
    12_000
}

fn default_style_prompt() -> String {
    "You are an artificial intelligence that responds to user requests in a chat messenger".into()
}

fn default_temperature() -> f64 {
    1.0
}

fn default_summary_temperature() -> f64 {
    0.1
}

fn default_no_answer_text() -> String {
    "The model did not answer.".into()
}

fn default_remote_failure_text() -> String {
    "The model is unavailable right now. Please try again later.".into()
}

// ============================================================================
// Storage / Observability
// ============================================================================

/// Durable storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite database file; `~` is expanded
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    config_dir().join("relay.db").to_string_lossy().into_owned()
}

impl StorageConfig {
    /// Resolve the database path, expanding `~` and environment variables.
    pub fn resolved_path(&self) -> PathBuf {
        let expanded = shellexpand::full(&self.path)
            .map(|p| p.into_owned())
            .unwrap_or_else(|_| self.path.clone());
        PathBuf::from(expanded)
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

// ============================================================================
// Root Configuration
// ============================================================================

/// Root relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub llm: LlmConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path, or defaults if it is missing.
    pub fn load() -> Result<Self> {
        let path = config_path();
        if !path.exists() {
            tracing::info!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;

        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))
    }

    /// Load configuration (explicit path or default) and apply env overrides.
    pub fn load_with_env(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_from(p)?,
            None => Self::load()?,
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("RELAY_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            if !key.is_empty() {
                self.llm.api_key = Some(key);
            }
        }
        if let Some(url) = lookup("RELAY_BASE_URL") {
            self.llm.base_url = url;
        }
        if let Some(model) = lookup("RELAY_MODEL") {
            self.llm.model = model;
        }
        if let Some(path) = lookup("RELAY_DB_PATH") {
            self.storage.path = path;
        }
        if let Some(level) = lookup("RELAY_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Some(format) = lookup("RELAY_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Save the configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save the configuration as pretty JSON, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }
}
