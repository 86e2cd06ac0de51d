use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;

use crate::chat::service::DEFAULT_TOKEN_LOG_CAPACITY;
use crate::generation::ollama::{DEFAULT_BASE_URL, DEFAULT_MODEL, DEFAULT_TEMPERATURE};

/// Which token source drives generation
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceConfig {
    /// Synthetic `Token-N` stream
    Ticker {
        #[serde(default = "default_interval_ms")]
        interval_ms: u64,
        #[serde(default = "default_total_tokens")]
        total_tokens: usize,
    },
    /// Local Ollama server
    Ollama {
        #[serde(default = "default_base_url")]
        base_url: String,
        #[serde(default = "default_model")]
        model: String,
        #[serde(default = "default_temperature")]
        temperature: f32,
    },
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig::Ticker {
            interval_ms: default_interval_ms(),
            total_tokens: default_total_tokens(),
        }
    }
}

fn default_interval_ms() -> u64 {
    100
}

fn default_total_tokens() -> usize {
    1000
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Settings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Fallback filter when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Tokens kept for replay by cursor
    #[serde(default = "default_token_log_capacity")]
    pub token_log_capacity: usize,
    /// Name given to chats created by `POST /api/prompts`
    #[serde(default = "default_chat_name")]
    pub default_chat_name: String,
    #[serde(default)]
    pub source: SourceConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_token_log_capacity() -> usize {
    DEFAULT_TOKEN_LOG_CAPACITY
}

fn default_chat_name() -> String {
    "TestChat".to_string()
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            token_log_capacity: default_token_log_capacity(),
            default_chat_name: default_chat_name(),
            source: SourceConfig::default(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with defaults
            .add_source(File::with_name("config/default").required(false))
            // Add environment-specific file
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // Add local configuration file (not tracked by git)
            .add_source(File::with_name("config/local").required(false))
            // TOKENPIPE_PORT=8080, TOKENPIPE_SOURCE__KIND=ollama, ...
            .add_source(
                Environment::with_prefix("TOKENPIPE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        s.try_deserialize()
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
