//! Configuration management for the Wink assistant backend
//!
//! Supports loading configuration from:
//! - YAML files (config/default.yaml, config/{env}.yaml)
//! - Environment variables (WINK_ prefix, `__` section separator)
//!
//! Provider credentials are never written to config files; they are read
//! from the conventional environment variables (OPENAI_API_KEY,
//! OPENROUTER_API_KEY, ELEVENLABS_API_KEY) and validated at startup.

pub mod settings;

pub use settings::{
    load_settings, AudioConfig, ConversationConfig, ObservabilityConfig, ProviderConfig,
    ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration load error: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Missing credential: {0}")]
    MissingCredential(String),
}
