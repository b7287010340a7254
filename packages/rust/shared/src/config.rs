//! Application configuration for aivis.
//!
//! User config lives at `~/.aivis/aivis.toml`.
//! CLI flags override config file values, which override defaults.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AivisError, Result};
use crate::types::QuestionType;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "aivis.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".aivis";

/// Instruction sent with every probe question.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant answering a buyer's \
research question. Answer directly, name specific products and companies where relevant, \
and cite your sources.";

// ---------------------------------------------------------------------------
// Config structs (matching aivis.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Global defaults.
    #[serde(default)]
    pub defaults: DefaultsConfig,

    /// Answer engine settings.
    #[serde(default)]
    pub answer_engine: AnswerEngineConfig,

    /// Retry settings for answer engine calls.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// `[defaults]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DefaultsConfig {
    /// Path of the libSQL database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Questions generated per assessment.
    #[serde(default = "default_question_count")]
    pub question_count: usize,

    /// Maximum in-flight answer engine calls per run.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Question types to generate; empty means all.
    #[serde(default)]
    pub allowed_types: Vec<QuestionType>,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            question_count: default_question_count(),
            concurrency: default_concurrency(),
            allowed_types: Vec::new(),
        }
    }
}

fn default_database_path() -> String {
    "~/.aivis/aivis.db".into()
}
fn default_question_count() -> usize {
    10
}
fn default_concurrency() -> usize {
    3
}

/// `[answer_engine]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnswerEngineConfig {
    /// Base URL of the chat-completions API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Timeout for a single HTTP request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Wall-clock budget for one question, retries included.
    #[serde(default = "default_question_timeout")]
    pub question_timeout_secs: u64,
}

impl Default for AnswerEngineConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            api_key_env: default_api_key_env(),
            request_timeout_secs: default_request_timeout(),
            question_timeout_secs: default_question_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.perplexity.ai".into()
}
fn default_model() -> String {
    "sonar".into()
}
fn default_api_key_env() -> String {
    "PERPLEXITY_API_KEY".into()
}
fn default_request_timeout() -> u64 {
    60
}
fn default_question_timeout() -> u64 {
    90
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per question, first try included.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the second attempt; doubles afterwards.
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    /// Upper bound on any single delay.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

fn default_max_attempts() -> u32 {
    2
}
fn default_initial_backoff() -> u64 {
    500
}
fn default_max_backoff() -> u64 {
    5_000
}

// ---------------------------------------------------------------------------
// Engine config (runtime, resolved once at construction)
// ---------------------------------------------------------------------------

/// Runtime answer engine configuration with the API key already resolved.
#[derive(Clone)]
pub struct EngineConfig {
    pub base_url: String,
    pub model: String,
    /// Empty when the key env var is unset; the self-test reports it.
    pub api_key: String,
    pub request_timeout: Duration,
    pub system_prompt: String,
}

impl EngineConfig {
    /// Resolve the engine config, reading the API key env var exactly once.
    pub fn from_app_config(config: &AppConfig) -> Self {
        let api_key = std::env::var(&config.answer_engine.api_key_env).unwrap_or_default();
        Self::with_api_key(config, api_key)
    }

    /// Build from file settings with an explicit key (tests, secrets managers).
    pub fn with_api_key(config: &AppConfig, api_key: impl Into<String>) -> Self {
        Self {
            base_url: config.answer_engine.base_url.trim_end_matches('/').to_string(),
            model: config.answer_engine.model.clone(),
            api_key: api_key.into(),
            request_timeout: Duration::from_secs(config.answer_engine.request_timeout_secs),
            system_prompt: DEFAULT_SYSTEM_PROMPT.into(),
        }
    }

    /// Problems that make the engine unusable, without touching the network.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.api_key.trim().is_empty() {
            problems.push("answer engine API key is not set".to_string());
        }
        if let Err(e) = url::Url::parse(&self.base_url) {
            problems.push(format!("invalid answer engine base URL '{}': {e}", self.base_url));
        }
        if self.model.trim().is_empty() {
            problems.push("answer engine model is empty".to_string());
        }
        problems
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &if self.api_key.is_empty() { "<unset>" } else { "<redacted>" })
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.aivis/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| AivisError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.aivis/aivis.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| AivisError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| AivisError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| AivisError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| AivisError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| AivisError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` to the user's home directory.
pub fn resolve_path(raw: &str) -> Result<PathBuf> {
    match raw.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| AivisError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(raw)),
    }
}
