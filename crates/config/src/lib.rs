//! Configuration loading, validation, and management for Steward.
//!
//! Loads configuration from `~/.steward/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.steward/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Default LLM provider
    #[serde(default = "default_provider")]
    pub default_provider: String,

    /// Default model
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Embedding model; empty disables embeddings
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Default temperature
    #[serde(default = "default_temperature")]
    pub default_temperature: f32,

    /// Default max tokens per LLM response
    #[serde(default = "default_max_tokens")]
    pub default_max_tokens: u32,

    /// Memory store and manager configuration
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Request routing configuration
    #[serde(default)]
    pub router: RouterConfig,

    /// External tool discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// Provider-specific configurations
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,
}

fn default_provider() -> String {
    "openrouter".into()
}
fn default_model() -> String {
    "anthropic/claude-sonnet-4".into()
}
fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}
fn default_temperature() -> f32 {
    0.7
}
fn default_max_tokens() -> u32 {
    4096
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
            .field("default_provider", &self.default_provider)
            .field("default_model", &self.default_model)
            .field("embedding_model", &self.embedding_model)
            .field("default_temperature", &self.default_temperature)
            .field("default_max_tokens", &self.default_max_tokens)
            .field("memory", &self.memory)
            .field("router", &self.router)
            .field("discovery", &self.discovery)
            .field("providers", &self.providers)
            .finish()
    }
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("default_model", &self.default_model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// "sqlite" or "in_memory"
    #[serde(default = "default_memory_backend")]
    pub backend: String,

    /// SQLite database path; defaults to `~/.steward/memory.db`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default = "default_working_ttl_secs")]
    pub working_ttl_secs: u64,

    #[serde(default = "default_handoff_ttl_secs")]
    pub handoff_ttl_secs: u64,

    /// Preferences and rules below this confidence stay out of the context block
    #[serde(default = "default_min_confidence")]
    pub context_min_confidence: f32,

    #[serde(default = "default_context_top_k")]
    pub context_top_k: usize,

    #[serde(default = "default_context_workflow_limit")]
    pub context_workflow_limit: usize,

    #[serde(default = "default_workflow_step_preview")]
    pub workflow_step_preview: usize,
}

fn default_memory_backend() -> String {
    "sqlite".into()
}
fn default_working_ttl_secs() -> u64 {
    7200
}
fn default_handoff_ttl_secs() -> u64 {
    300
}
fn default_min_confidence() -> f32 {
    0.5
}
fn default_context_top_k() -> usize {
    5
}
fn default_context_workflow_limit() -> usize {
    3
}
fn default_workflow_step_preview() -> usize {
    3
}
fn default_true() -> bool {
    true
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: default_memory_backend(),
            path: None,
            working_ttl_secs: default_working_ttl_secs(),
            handoff_ttl_secs: default_handoff_ttl_secs(),
            context_min_confidence: default_min_confidence(),
            context_top_k: default_context_top_k(),
            context_workflow_limit: default_context_workflow_limit(),
            workflow_step_preview: default_workflow_step_preview(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Tool-use loop iteration cap
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    #[serde(default = "default_min_confidence")]
    pub rule_min_confidence: f32,

    /// Embedding similarity floor for stored-workflow matches
    #[serde(default = "default_workflow_similarity")]
    pub workflow_similarity: f32,

    #[serde(default = "default_true")]
    pub multi_step_enabled: bool,

    /// Compress large tool results before sending them back to the LLM
    #[serde(default = "default_true")]
    pub compress_results: bool,

    #[serde(default = "default_compress_threshold_chars")]
    pub compress_threshold_chars: usize,
}

fn default_max_iterations() -> usize {
    10
}
fn default_workflow_similarity() -> f32 {
    0.70
}
fn default_compress_threshold_chars() -> usize {
    4000
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            rule_min_confidence: default_min_confidence(),
            workflow_similarity: default_workflow_similarity(),
            multi_step_enabled: true,
            compress_results: true,
            compress_threshold_chars: default_compress_threshold_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_solution_reuse_threshold")]
    pub solution_reuse_threshold: f32,

    #[serde(default = "default_answer_reuse_threshold")]
    pub answer_reuse_threshold: f32,

    #[serde(default = "default_handshake_timeout_secs")]
    pub handshake_timeout_secs: u64,

    #[serde(default = "default_invocation_timeout_secs")]
    pub invocation_timeout_secs: u64,

    /// How much of a result is kept as the record's preview
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

fn default_solution_reuse_threshold() -> f32 {
    0.85
}
fn default_answer_reuse_threshold() -> f32 {
    0.65
}
fn default_handshake_timeout_secs() -> u64 {
    10
}
fn default_invocation_timeout_secs() -> u64 {
    30
}
fn default_preview_chars() -> usize {
    500
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            solution_reuse_threshold: default_solution_reuse_threshold(),
            answer_reuse_threshold: default_answer_reuse_threshold(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            invocation_timeout_secs: default_invocation_timeout_secs(),
            preview_chars: default_preview_chars(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_model: Option<String>,
}

impl AppConfig {
    /// Load configuration from the default path (~/.steward/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `STEWARD_API_KEY` (highest priority)
    /// - `OPENROUTER_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("STEWARD_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENROUTER_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(provider) = std::env::var("STEWARD_PROVIDER") {
            config.default_provider = provider;
        }

        if let Ok(model) = std::env::var("STEWARD_MODEL") {
            config.default_model = model;
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

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".steward")
    }

    /// Resolved SQLite database path.
    pub fn memory_db_path(&self) -> PathBuf {
        self.memory
            .path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Self::config_dir().join("memory.db"))
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_temperature < 0.0 || self.default_temperature > 2.0 {
            return Err(ConfigError::ValidationError(
                "default_temperature must be between 0.0 and 2.0".into(),
            ));
        }

        let thresholds = [
            ("memory.context_min_confidence", self.memory.context_min_confidence),
            ("router.rule_min_confidence", self.router.rule_min_confidence),
            ("router.workflow_similarity", self.router.workflow_similarity),
            ("discovery.solution_reuse_threshold", self.discovery.solution_reuse_threshold),
            ("discovery.answer_reuse_threshold", self.discovery.answer_reuse_threshold),
        ];
        for (name, value) in thresholds {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::ValidationError(format!(
                    "{name} must be between 0.0 and 1.0"
                )));
            }
        }

        if self.memory.working_ttl_secs == 0 || self.memory.handoff_ttl_secs == 0 {
            return Err(ConfigError::ValidationError(
                "memory TTLs must be greater than zero".into(),
            ));
        }

        if self.router.max_iterations == 0 {
            return Err(ConfigError::ValidationError(
                "router.max_iterations must be at least 1".into(),
            ));
        }

        if !matches!(self.memory.backend.as_str(), "sqlite" | "in_memory") {
            return Err(ConfigError::ValidationError(format!(
                "unknown memory backend '{}'",
                self.memory.backend
            )));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Generate a default config TOML string (for `onboard` command).
    pub fn default_toml() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            default_provider: default_provider(),
            default_model: default_model(),
            embedding_model: default_embedding_model(),
            default_temperature: default_temperature(),
            default_max_tokens: default_max_tokens(),
            memory: MemoryConfig::default(),
            router: RouterConfig::default(),
            discovery: DiscoveryConfig::default(),
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
}

impl From<ConfigError> for steward_core::Error {
    fn from(err: ConfigError) -> Self {
        steward_core::Error::Config {
            message: err.to_string(),
        }
    }
}
