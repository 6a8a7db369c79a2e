//! Configuration management for the CodeChat gateway.
//!
//! The gateway reads a single configuration file at `~/.codechat/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (CODECHAT_* prefix, plus `OLLAMA_BASE_URL`)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `CODECHAT_PORT` → server.port
//! - `CODECHAT_BIND_ADDRESS` → network.bind
//! - `CODECHAT_ARTIFACT_DIR` → server.artifact_dir
//! - `CODECHAT_MODEL` → llm.ollama.default_model
//! - `CODECHAT_LOG_LEVEL` → observability.log_level
//! - `OLLAMA_BASE_URL` → llm.ollama.base_url

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new()
        .map_or_else(
            || PathBuf::from(".codechat"),
            |dirs| dirs.home_dir().join(".codechat"),
        )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

// ============================================================================
// Network Configuration
// ============================================================================

/// Network configuration.
///
/// Default is `127.0.0.1` (local only). Set to `0.0.0.0` to allow remote access.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Bind address for the gateway.
    #[serde(default = "default_bind_address")]
    pub bind: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind: default_bind_address(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP server and session settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Directory for generated code files.
    /// Defaults to `generated_code` under the config directory.
    #[serde(default)]
    pub artifact_dir: Option<String>,

    /// Maximum turns retained per session
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,

    /// Maximum accepted request body size in bytes
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            artifact_dir: None,
            history_limit: default_history_limit(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

fn default_port() -> u16 {
    3000
}

fn default_history_limit() -> usize {
    20
}

fn default_max_body_bytes() -> usize {
    1024 * 1024
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// LLM backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Ollama (local models) configuration
    #[serde(default)]
    pub ollama: OllamaConfig,
}

/// Ollama backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OllamaConfig {
    /// Ollama API base URL
    #[serde(default = "default_ollama_url")]
    pub base_url: String,

    /// Model used when a request does not name one
    #[serde(default = "default_ollama_model")]
    pub default_model: String,

    /// Request timeout in seconds (local models can be slow)
    #[serde(default = "default_ollama_timeout")]
    pub timeout_secs: u64,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            base_url: default_ollama_url(),
            default_model: default_ollama_model(),
            timeout_secs: default_ollama_timeout(),
            temperature: default_temperature(),
        }
    }
}

fn default_ollama_url() -> String {
    "http://localhost:11434".into()
}

fn default_ollama_model() -> String {
    "llama3".into()
}

fn default_ollama_timeout() -> u64 {
    300 // 5 minutes, local models can be slow
}

fn default_temperature() -> f64 {
    0.7
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to set to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
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

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Network configuration (bind address)
    #[serde(default)]
    pub network: NetworkConfig,

    /// HTTP server and session settings
    #[serde(default)]
    pub server: ServerConfig,

    /// LLM backend configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Config {
    /// Load configuration from the default path.
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

    /// Load configuration with environment variable overrides.
    pub fn load_with_env() -> Result<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("CODECHAT_PORT") {
            if let Ok(p) = port.parse() {
                self.server.port = p;
            }
        }

        if let Ok(bind) = std::env::var("CODECHAT_BIND_ADDRESS") {
            self.network.bind = bind;
        }

        if let Ok(dir) = std::env::var("CODECHAT_ARTIFACT_DIR") {
            self.server.artifact_dir = Some(dir);
        }

        if let Ok(model) = std::env::var("CODECHAT_MODEL") {
            self.llm.ollama.default_model = model;
        }

        if let Ok(url) = std::env::var("OLLAMA_BASE_URL") {
            self.llm.ollama.base_url = url;
        }

        if let Ok(level) = std::env::var("CODECHAT_LOG_LEVEL") {
            self.observability.log_level = level;
        }
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<()> {
        self.save_to(&config_path())
    }

    /// Save configuration to a specific path, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config to {}", path.display()))
    }

    /// Get the effective bind address.
    pub fn bind_address(&self) -> &str {
        &self.network.bind
    }

    /// Directory that holds per-session generated code files.
    pub fn artifact_dir(&self) -> PathBuf {
        self.server
            .artifact_dir
            .as_ref()
            .map_or_else(|| config_dir().join("generated_code"), PathBuf::from)
    }
}
