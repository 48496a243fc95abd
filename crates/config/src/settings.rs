//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// External provider configuration (STT, intent, TTS)
    #[serde(default)]
    pub providers: ProviderConfig,

    /// Conversation state machine configuration
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Audio ingestion and speech output configuration
    #[serde(default)]
    pub audio: AudioConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP server host
    #[serde(default = "default_host")]
    pub host: String,

    /// HTTP server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    /// CORS allowed origins (empty = localhost default)
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8000
}
fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: default_true(),
            cors_origins: Vec::new(),
        }
    }
}

/// External provider endpoints, models, and credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// OpenAI API key (from OPENAI_API_KEY)
    #[serde(default = "env_openai_key")]
    pub openai_api_key: Option<String>,

    /// Realtime transcription WebSocket URL
    #[serde(default = "default_realtime_url")]
    pub realtime_url: String,

    /// Transcription model
    #[serde(default = "default_transcribe_model")]
    pub transcribe_model: String,

    /// OpenRouter API key (from OPENROUTER_API_KEY)
    #[serde(default = "env_openrouter_key")]
    pub openrouter_api_key: Option<String>,

    /// OpenRouter chat completions URL
    #[serde(default = "default_openrouter_url")]
    pub openrouter_url: String,

    /// Intent resolution model (vision-capable)
    #[serde(default = "default_intent_model")]
    pub intent_model: String,

    /// ElevenLabs API key (from ELEVENLABS_API_KEY)
    #[serde(default = "env_elevenlabs_key")]
    pub elevenlabs_api_key: Option<String>,

    /// ElevenLabs voice ID
    #[serde(default = "default_voice_id")]
    pub elevenlabs_voice_id: String,
}

fn env_openai_key() -> Option<String> {
    std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty())
}
fn env_openrouter_key() -> Option<String> {
    std::env::var("OPENROUTER_API_KEY").ok().filter(|k| !k.is_empty())
}
fn env_elevenlabs_key() -> Option<String> {
    std::env::var("ELEVENLABS_API_KEY").ok().filter(|k| !k.is_empty())
}
fn default_realtime_url() -> String {
    "wss://api.openai.com/v1/realtime?intent=transcription".to_string()
}
fn default_transcribe_model() -> String {
    "gpt-4o-mini-transcribe".to_string()
}
fn default_openrouter_url() -> String {
    "https://openrouter.ai/api/v1/chat/completions".to_string()
}
fn default_intent_model() -> String {
    "google/gemini-2.0-flash-001".to_string()
}
fn default_voice_id() -> String {
    std::env::var("ELEVENLABS_VOICE_ID").unwrap_or_else(|_| "21m00Tcm4TlvDq8ikWAM".to_string())
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            openai_api_key: env_openai_key(),
            realtime_url: default_realtime_url(),
            transcribe_model: default_transcribe_model(),
            openrouter_api_key: env_openrouter_key(),
            openrouter_url: default_openrouter_url(),
            intent_model: default_intent_model(),
            elevenlabs_api_key: env_elevenlabs_key(),
            elevenlabs_voice_id: default_voice_id(),
        }
    }
}

impl ProviderConfig {
    /// Fail fast when a required credential is missing.
    pub fn require_openai_key(&self) -> Result<&str, ConfigError> {
        self.openai_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingCredential("OPENAI_API_KEY".to_string()))
    }

    pub fn require_openrouter_key(&self) -> Result<&str, ConfigError> {
        self.openrouter_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingCredential("OPENROUTER_API_KEY".to_string()))
    }

    pub fn require_elevenlabs_key(&self) -> Result<&str, ConfigError> {
        self.elevenlabs_api_key
            .as_deref()
            .ok_or_else(|| ConfigError::MissingCredential("ELEVENLABS_API_KEY".to_string()))
    }
}

/// Conversation state machine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Phrases that wake the assistant from the dormant state
    #[serde(default = "default_wake_phrases")]
    pub wake_phrases: Vec<String>,

    /// Seconds of inactivity before the session goes dormant again
    #[serde(default = "default_inactivity_timeout")]
    pub inactivity_timeout_secs: u64,

    /// Retained conversation turns (history is bounded at 2x this)
    #[serde(default = "default_max_turns")]
    pub max_history_turns: usize,
}

fn default_wake_phrases() -> Vec<String> {
    vec![
        "hey wink".to_string(),
        "okay wink".to_string(),
        "hi wink".to_string(),
        "wink".to_string(),
    ]
}
fn default_inactivity_timeout() -> u64 {
    30
}
fn default_max_turns() -> usize {
    10
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            wake_phrases: default_wake_phrases(),
            inactivity_timeout_secs: default_inactivity_timeout(),
            max_history_turns: default_max_turns(),
        }
    }
}

/// Audio ingestion and speech output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Capacity of the per-session audio ingestion queue, in chunks
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Size of the binary chunks synthesized speech is streamed in
    #[serde(default = "default_tts_chunk_bytes")]
    pub tts_chunk_bytes: usize,
}

fn default_queue_capacity() -> usize {
    50
}
fn default_tts_chunk_bytes() -> usize {
    4096
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            tts_chunk_bytes: default_tts_chunk_bytes(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub log_json: bool,

    /// Enable Prometheus metrics
    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conversation.wake_phrases.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "conversation.wake_phrases".to_string(),
                message: "At least one wake phrase is required".to_string(),
            });
        }

        if self.conversation.inactivity_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.inactivity_timeout_secs".to_string(),
                message: "Timeout must be non-zero".to_string(),
            });
        }

        if self.conversation.max_history_turns == 0 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.max_history_turns".to_string(),
                message: "History must retain at least one turn".to_string(),
            });
        }

        if self.audio.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.queue_capacity".to_string(),
                message: "Audio queue capacity must be non-zero".to_string(),
            });
        }

        if self.audio.tts_chunk_bytes == 0 {
            return Err(ConfigError::InvalidValue {
                field: "audio.tts_chunk_bytes".to_string(),
                message: "TTS chunk size must be non-zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Load settings from config files and environment variables
///
/// Priority: env vars > config/{env}.yaml > config/default.yaml > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("WINK")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let settings: Settings = config.try_deserialize()?;

    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8000);
        assert_eq!(settings.conversation.inactivity_timeout_secs, 30);
        assert_eq!(settings.audio.queue_capacity, 50);
        assert!(settings
            .conversation
            .wake_phrases
            .iter()
            .any(|p| p == "hey wink"));
    }

    #[test]
    fn test_settings_validation() {
        let mut settings = Settings::default();
        settings.conversation.wake_phrases.clear();
        assert!(settings.validate().is_err());

        settings.conversation.wake_phrases = vec!["hey wink".to_string()];
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_missing_credential_is_an_error() {
        let providers = ProviderConfig {
            openrouter_api_key: None,
            ..ProviderConfig::default()
        };
        assert!(matches!(
            providers.require_openrouter_key(),
            Err(ConfigError::MissingCredential(_))
        ));
    }
}
