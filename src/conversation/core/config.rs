//! Configuration for the chat relay.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::conversation::core::errors::{ChatError, ChatResult};

/// Environment variable for the HTTP port.
pub const PORT_ENV: &str = "CHAT_RELAY_PORT";
/// Environment variable for the `SQLite` database path.
pub const DB_PATH_ENV: &str = "CHAT_RELAY_DB_PATH";
/// Environment variable for the Groq API key.
pub const API_KEY_ENV: &str = "GROQ_API_KEY";
/// Environment variable for the completion endpoint base URL.
pub const BASE_URL_ENV: &str = "CHAT_RELAY_LLM_BASE_URL";
/// Environment variable for the completion model name.
pub const MODEL_ENV: &str = "CHAT_RELAY_LLM_MODEL";
/// Environment variable for the completion request timeout.
pub const TIMEOUT_ENV: &str = "CHAT_RELAY_LLM_TIMEOUT_SECS";

/// Top-level configuration for the relay service.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HTTP server settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Completion model settings.
    pub llm: LlmConfig,
}

impl RelayConfig {
    /// Load configuration from the process environment, reading `.env` first if present.
    ///
    /// # Errors
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_env() -> ChatResult<Self> {
        // A missing .env file is the normal case in deployment.
        let _ = dotenv::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from `lookup` on top of the defaults.
    ///
    /// # Errors
    /// Returns an error if a numeric variable cannot be parsed.
    pub fn from_lookup<F>(lookup: F) -> ChatResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(port) = lookup(PORT_ENV) {
            config.server.port = port.trim().parse().map_err(|_| {
                ChatError::InvalidConfig(format!("{PORT_ENV} must be a port number, got {port:?}"))
            })?;
        }
        if let Some(path) = lookup(DB_PATH_ENV) {
            config.storage.sqlite_path = PathBuf::from(path);
        }
        if let Some(key) = lookup(API_KEY_ENV) {
            config.llm.api_key = Some(key);
        }
        if let Some(base_url) = lookup(BASE_URL_ENV) {
            config.llm.base_url = base_url;
        }
        if let Some(model) = lookup(MODEL_ENV) {
            config.llm.model = model;
        }
        if let Some(timeout) = lookup(TIMEOUT_ENV) {
            config.llm.timeout_seconds = timeout.trim().parse().map_err(|_| {
                ChatError::InvalidConfig(format!("{TIMEOUT_ENV} must be whole seconds, got {timeout:?}"))
            })?;
        }

        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.server.port == 0 {
            return Err(ChatError::InvalidConfig("server.port must be > 0".to_string()));
        }

        if self.llm.timeout_seconds == 0 {
            return Err(ChatError::InvalidConfig(
                "llm.timeout_seconds must be > 0".to_string(),
            ));
        }

        if self.llm.max_tokens == 0 {
            return Err(ChatError::InvalidConfig(
                "llm.max_tokens must be > 0".to_string(),
            ));
        }

        match &self.llm.api_key {
            Some(key) if !key.trim().is_empty() => {}
            _ => {
                return Err(ChatError::InvalidConfig(format!(
                    "API key for Groq is missing, set {API_KEY_ENV}"
                )));
            }
        }

        Url::parse(&self.llm.base_url)?;

        Ok(())
    }
}

/// HTTP server settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listening port.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: crate::server::DEFAULT_PORT,
        }
    }
}

/// Storage configuration for conversation data.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path.
    pub sqlite_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("chatbot.db"),
        }
    }
}

/// Completion model settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Bearer token for the completion API.
    pub api_key: Option<String>,
    /// OpenAI-compatible base URL (without `/chat/completions`).
    pub base_url: String,
    /// Completion model name.
    pub model: String,
    /// Temperature for generation.
    pub temperature: f64,
    /// Nucleus sampling mass.
    pub top_p: f64,
    /// Max tokens per completion.
    pub max_tokens: u32,
    /// Whole-request timeout, streaming included.
    pub timeout_seconds: u64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.groq.com/openai/v1".to_string(),
            model: "llama-3.1-8b-instant".to_string(),
            temperature: 1.0,
            top_p: 1.0,
            max_tokens: 1024,
            timeout_seconds: 120,
        }
    }
}
