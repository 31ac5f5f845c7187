//! Configuration loading and management for dossier.
//!
//! Loads settings from `dossier.toml` with an environment variable override
//! for the API credential. Every field has a default, so a config file is
//! only needed to change the model, endpoint, or row cap.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

use crate::extract::DEFAULT_TABLE_ROW_CAP;

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_MODEL: &str = "nvidia/llama-3.1-nemotron-ultra-253b-v1:free";
const DEFAULT_PERSONA: &str =
    "You are a helpful assistant that answers questions based on uploaded file content.";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("missing required API key (set OPENROUTER_API_KEY or [api] openrouter_key)")]
    MissingApiKey,
}

/// Completion service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Base URL of the OpenAI-compatible API
    pub base_url: String,
    /// Model identifier (e.g., "nvidia/llama-3.1-nemotron-ultra-253b-v1:free")
    pub model: String,
    /// System directive installed at the head of every transcript
    pub persona: String,
    /// Optional HTTP-Referer header sent with completion requests
    pub referer: Option<String>,
    /// Optional X-Title header sent with completion requests
    pub title: Option<String>,
}

/// API key configuration (usually loaded from the environment)
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ApiConfig {
    #[serde(default)]
    pub openrouter_key: Option<String>,
}

/// Extraction policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Rows kept from tabular input, header included
    pub table_row_cap: usize,
}

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub agent: AgentConfig,
    pub api: ApiConfig,
    pub extract: ExtractConfig,
}

impl Config {
    /// Load configuration from the default location (dossier.toml in cwd or
    /// home), falling back to defaults when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        match Self::find_config_file() {
            Some(path) => Self::load_from(&path),
            None => Ok(Self::default().with_env_overrides()),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config.with_env_overrides())
    }

    /// Override the API key from the environment variable
    fn with_env_overrides(mut self) -> Self {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            self.api.openrouter_key = Some(key);
        }
        self
    }

    /// Find the config file in standard locations
    fn find_config_file() -> Option<PathBuf> {
        // Check current directory first
        let local_config = PathBuf::from("dossier.toml");
        if local_config.exists() {
            return Some(local_config);
        }

        // Check home directory
        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config").join("dossier").join("dossier.toml");
            if home_config.exists() {
                return Some(home_config);
            }
        }

        None
    }

    /// Get the API key, failing fast when none is configured
    pub fn api_key(&self) -> Result<&str, ConfigError> {
        self.api
            .openrouter_key
            .as_deref()
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingApiKey)
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            persona: DEFAULT_PERSONA.to_string(),
            referer: None,
            title: None,
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            table_row_cap: DEFAULT_TABLE_ROW_CAP,
        }
    }
}
