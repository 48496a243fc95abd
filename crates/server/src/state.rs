//! Application State
//!
//! Shared state across all handlers.

use std::sync::Arc;

use wink_brain::{IntentResolver, OpenRouterResolver};
use wink_config::Settings;
use wink_speech::{ElevenLabsSynthesizer, Synthesizer, TranscriptionRelay};

use crate::devices::DeviceRegistry;
use crate::ServerError;

/// Application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Settings>,
    /// Companion devices currently connected, shared by both sockets.
    pub devices: Arc<DeviceRegistry>,
    /// Turns final transcripts into replies and device actions.
    pub resolver: Arc<dyn IntentResolver>,
    /// Produces spoken audio for assistant replies.
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Per-session realtime transcription relay.
    pub relay: Arc<TranscriptionRelay>,
}

impl AppState {
    /// Create application state with the production providers. Provider
    /// credentials are checked here so a misconfigured deployment fails at
    /// startup rather than mid-session.
    pub fn new(config: Settings) -> Result<Self, ServerError> {
        let devices = Arc::new(DeviceRegistry::new());

        let resolver = OpenRouterResolver::new(&config.providers, devices.clone())
            .map_err(|e| ServerError::Configuration(e.to_string()))?;
        let synthesizer = ElevenLabsSynthesizer::new(&config.providers)
            .map_err(|e| ServerError::Configuration(e.to_string()))?;
        let relay = TranscriptionRelay::new(&config.providers)
            .map_err(|e| ServerError::Configuration(e.to_string()))?;

        Ok(Self {
            config: Arc::new(config),
            devices,
            resolver: Arc::new(resolver),
            synthesizer: Arc::new(synthesizer),
            relay: Arc::new(relay),
        })
    }

    /// Build state from already-constructed collaborators.
    pub fn with_providers(
        config: Settings,
        devices: Arc<DeviceRegistry>,
        resolver: Arc<dyn IntentResolver>,
        synthesizer: Arc<dyn Synthesizer>,
        relay: Arc<TranscriptionRelay>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            devices,
            resolver,
            synthesizer,
            relay,
        }
    }
}
