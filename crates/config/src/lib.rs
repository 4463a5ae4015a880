//! Configuration loading, validation, and management for mcpchat.
//!
//! Loads configuration from `~/.mcpchat/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

/// Environment variables consulted for the API key, highest priority first.
pub const API_KEY_ENV_VARS: [&str; 3] = ["MCPCHAT_API_KEY", "GEMINI_API_KEY", "GOOGLE_API_KEY"];

/// The environment variable to suggest when `provider` has no key.
pub fn api_key_env_var(provider: &str) -> &'static str {
    match provider {
        "gemini" | "google" => "GEMINI_API_KEY",
        _ => "MCPCHAT_API_KEY",
    }
}

/// Providers that run locally and need no credentials.
const KEYLESS_PROVIDERS: [&str; 4] = ["ollama", "vllm", "llamacpp", "llama.cpp"];

/// The root configuration structure.
///
/// Maps directly to `~/.mcpchat/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// LLM provider
    #[serde(default = "default_provider")]
    pub provider: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Tool-provider process settings
    #[serde(default)]
    pub mcp: McpConfig,

    #[serde(default)]
    pub agent: AgentSettings,

    #[serde(default)]
    pub memory: MemoryConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "gemini".into()
}
fn default_model() -> String {
    "gemini-2.5-flash".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
}

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
            .field("provider", &self.provider)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("mcp", &self.mcp)
            .field("agent", &self.agent)
            .field("memory", &self.memory)
            .field("providers", &self.providers)
            .finish()
    }
}

/// How to launch the tool-provider (MCP server) process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpConfig {
    /// Executable name or path
    #[serde(default = "default_mcp_command")]
    pub command: String,

    #[serde(default)]
    pub args: Vec<String>,

    /// Extra environment variables for the server process
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    /// Per-request timeout for MCP calls
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_mcp_command() -> String {
    "releasecontroller-mcp-server".into()
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for McpConfig {
    fn default() -> Self {
        Self {
            command: default_mcp_command(),
            args: vec![],
            env: BTreeMap::new(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Upper bound on model calls per user turn
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,

    /// Replaces the built-in system prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

fn default_max_iterations() -> u32 {
    20
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Number of recent turns kept as context
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

fn default_window_size() -> usize {
    6
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

#[derive(Clone, Default, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.mcpchat/config.toml)
    /// and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_with(None)
    }

    /// Like [`AppConfig::load`], reading `path` instead of the default file.
    pub fn load_with(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(Self::config_path);
        let mut config = Self::load_from(&path)?;
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path, without env overrides.
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

    /// Apply environment overrides. `lookup` is `std::env::var` in production.
    ///
    /// - API key: config file wins, then `MCPCHAT_API_KEY`, `GEMINI_API_KEY`,
    ///   `GOOGLE_API_KEY`
    /// - `MCPCHAT_PROVIDER`, `MCPCHAT_MODEL`, `MCPCHAT_MCP_SERVER`
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if self.api_key.as_deref().is_none_or(str::is_empty) {
            self.api_key = API_KEY_ENV_VARS.iter().find_map(|key| non_empty(*key));
        }
        if let Some(provider) = non_empty("MCPCHAT_PROVIDER") {
            self.provider = provider;
        }
        if let Some(model) = non_empty("MCPCHAT_MODEL") {
            self.model = model;
        }
        if let Some(command) = non_empty("MCPCHAT_MCP_SERVER") {
            self.mcp.command = command;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".mcpchat")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::ValidationError(
                "temperature must be between 0.0 and 2.0".into(),
            ));
        }

        if self.agent.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_iterations must be at least 1".into(),
            ));
        }

        if self.mcp.command.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "mcp.command must name an executable".into(),
            ));
        }

        if self.mcp.request_timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "mcp.request_timeout_secs must be at least 1".into(),
            ));
        }

        Ok(())
    }

    /// The API key for `provider`: per-provider key first, then the global one.
    pub fn api_key_for(&self, provider: &str) -> Option<&str> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.as_deref())
            .or(self.api_key.as_deref())
            .filter(|k| !k.is_empty())
    }

    /// Fail early when the selected provider needs a key and none is set.
    pub fn require_api_key(&self) -> Result<&str, ConfigError> {
        if KEYLESS_PROVIDERS.contains(&self.provider.as_str()) {
            return Ok(self.api_key_for(&self.provider).unwrap_or_default());
        }
        self.api_key_for(&self.provider)
            .ok_or_else(|| ConfigError::MissingApiKey {
                provider: self.provider.clone(),
                env_var: api_key_env_var(&self.provider),
            })
    }

    /// A copy safe to print: every secret replaced.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        let mask = |k: &mut Option<String>| {
            if k.is_some() {
                *k = Some("[REDACTED]".into());
            }
        };
        mask(&mut copy.api_key);
        copy.providers.values_mut().for_each(|p| mask(&mut p.api_key));
        copy
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider: default_provider(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            mcp: McpConfig::default(),
            agent: AgentSettings::default(),
            memory: MemoryConfig::default(),
            providers: HashMap::new(),
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

    #[error(
        "{env_var} environment variable not set (provider '{provider}'). \
         Please set it to your API key or add api_key to the config file."
    )]
    MissingApiKey {
        provider: String,
        env_var: &'static str,
    },
}
