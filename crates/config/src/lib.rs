//! Configuration loading, validation, and management for conduit.
//!
//! Loads configuration from `~/.conduit/config.toml` with environment
//! variable overrides. Validates all settings at startup. The resulting
//! structure is passed explicitly to the components that need it; nothing
//! here is global.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The root configuration structure.
///
/// Maps directly to `~/.conduit/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub transport: TransportConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub context: ContextConfig,

    #[serde(default)]
    pub tools: ToolsConfig,

    #[serde(default)]
    pub store: StoreConfig,
}

/// Model transport settings.
#[derive(Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Attempts after the first, before the stream starts
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn default_model() -> String {
    "gpt-4o".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_request_timeout_secs() -> u64 {
    120
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_backoff_ms() -> u64 {
    500
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key: None,
            temperature: default_temperature(),
            max_tokens: None,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
        }
    }
}

/// Redact a secret for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &redact(&self.api_key))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Model rounds that may request tools within one turn
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: usize,
}

fn default_system_prompt() -> String {
    "You are a careful assistant working in a terminal. Use the available tools when they \
     help, read tool errors, and adapt instead of repeating failing calls."
        .into()
}
fn default_max_tool_iterations() -> usize {
    25
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            system_prompt: default_system_prompt(),
            max_tool_iterations: default_max_tool_iterations(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Token budget for the context window
    #[serde(default = "default_context_max_tokens")]
    pub max_tokens: usize,

    /// Most recent turns that compaction never evicts
    #[serde(default = "default_pinned_recent_turns")]
    pub pinned_recent_turns: usize,
}

fn default_context_max_tokens() -> usize {
    128_000
}
fn default_pinned_recent_turns() -> usize {
    2
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: default_context_max_tokens(),
            pinned_recent_turns: default_pinned_recent_turns(),
        }
    }
}

/// A sliding-window rate limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_max_calls")]
    pub max_calls: u32,

    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_calls() -> u32 {
    10
}
fn default_window_secs() -> u64 {
    60
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_calls: default_max_calls(),
            window_secs: default_window_secs(),
        }
    }
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Per-tool overrides. Unset fields fall back to the `[tools]` defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ToolOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_calls: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_secs: Option<u64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_tool_timeout_secs")]
    pub default_timeout_secs: u64,

    /// Root for file tools and the shell's working directory.
    /// Unset means the current directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workspace_root: Option<PathBuf>,

    #[serde(default = "default_forbidden_paths")]
    pub forbidden_paths: Vec<String>,

    #[serde(default = "default_max_file_size_bytes")]
    pub max_file_size_bytes: u64,

    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,

    #[serde(default = "default_blocked_commands")]
    pub blocked_commands: Vec<String>,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    /// Keyed by tool name
    #[serde(default)]
    pub overrides: HashMap<String, ToolOverride>,
}

fn default_tool_timeout_secs() -> u64 {
    30
}
fn default_forbidden_paths() -> Vec<String> {
    ["~/.ssh", "~/.gnupg", "~/.aws", "/etc/shadow"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_file_size_bytes() -> u64 {
    1_048_576
}
fn default_max_output_bytes() -> usize {
    10_485_760
}
fn default_blocked_commands() -> Vec<String> {
    [
        "rm -rf", "sudo", "chmod 777", "dd if=", "mkfs", "fdisk", "format", "> /dev/",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: default_tool_timeout_secs(),
            rate_limit: RateLimitConfig::default(),
            overrides: HashMap::new(),
            workspace_root: None,
            forbidden_paths: default_forbidden_paths(),
            max_file_size_bytes: default_max_file_size_bytes(),
            max_output_bytes: default_max_output_bytes(),
            blocked_commands: default_blocked_commands(),
        }
    }
}

impl ToolsConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_timeout_secs)
    }

    /// Effective rate limit for a tool.
    pub fn rate_limit_for(&self, tool: &str) -> RateLimitConfig {
        match self.overrides.get(tool) {
            Some(o) => RateLimitConfig {
                max_calls: o.max_calls.unwrap_or(self.rate_limit.max_calls),
                window_secs: o.window_secs.unwrap_or(self.rate_limit.window_secs),
            },
            None => self.rate_limit,
        }
    }

    /// Effective timeout for a tool.
    pub fn timeout_for(&self, tool: &str) -> Duration {
        self.overrides
            .get(tool)
            .and_then(|o| o.timeout_secs)
            .map(Duration::from_secs)
            .unwrap_or_else(|| self.default_timeout())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Daily JSONL audit logs (`<YYYY-MM-DD>.log`) are written here
    #[serde(default = "default_audit_dir")]
    pub audit_dir: PathBuf,
}

fn default_store_path() -> PathBuf {
    AppConfig::config_dir().join("sessions.db")
}

fn default_audit_dir() -> PathBuf {
    AppConfig::config_dir().join("logs")
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            audit_dir: default_audit_dir(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default location with env overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with_overrides(&Self::config_dir().join("config.toml"))
    }

    /// Load from `path`, then apply environment overrides and re-validate.
    pub fn load_with_overrides(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load_from(path)?;
        config.apply_env(|key| std::env::var(key).ok());
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

    /// Apply environment overrides through `lookup`.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(key) = lookup("CONDUIT_API_KEY").or_else(|| lookup("OPENAI_API_KEY")) {
            self.transport.api_key = Some(key);
        }
        if let Some(url) = lookup("CONDUIT_BASE_URL") {
            self.transport.base_url = url;
        }
        if let Some(model) = lookup("CONDUIT_MODEL") {
            self.transport.model = model;
        }
        if let Some(path) = lookup("CONDUIT_DB_PATH") {
            self.store.path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("CONDUIT_AUDIT_DIR") {
            self.store.audit_dir = PathBuf::from(dir);
        }
    }

    /// Get the configuration directory path (`$CONDUIT_HOME` or `~/.conduit`).
    pub fn config_dir() -> PathBuf {
        match std::env::var("CONDUIT_HOME") {
            Ok(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs_home().join(".conduit"),
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.transport.temperature) {
            return Err(ConfigError::ValidationError(
                "transport.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if self.agent.max_tool_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_tool_iterations must be > 0".into(),
            ));
        }
        if self.context.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "context.max_tokens must be > 0".into(),
            ));
        }
        if self.context.pinned_recent_turns == 0 {
            return Err(ConfigError::ValidationError(
                "context.pinned_recent_turns must be > 0".into(),
            ));
        }
        if self.tools.default_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "tools.default_timeout_secs must be > 0".into(),
            ));
        }
        validate_rate_limit("tools.rate_limit", &self.tools.rate_limit)?;
        for name in self.tools.overrides.keys() {
            validate_rate_limit(
                &format!("tools.overrides.{name}"),
                &self.tools.rate_limit_for(name),
            )?;
            if self.tools.timeout_for(name).is_zero() {
                return Err(ConfigError::ValidationError(format!(
                    "tools.overrides.{name}.timeout_secs must be > 0"
                )));
            }
        }
        Ok(())
    }

    pub fn has_api_key(&self) -> bool {
        self.transport.api_key.is_some()
    }

    /// Generate a default config TOML string (for `init`).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

fn validate_rate_limit(section: &str, limit: &RateLimitConfig) -> Result<(), ConfigError> {
    if limit.max_calls == 0 || limit.window_secs == 0 {
        return Err(ConfigError::ValidationError(format!(
            "{section}: max_calls and window_secs must be > 0"
        )));
    }
    Ok(())
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
