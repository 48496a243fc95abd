//! Speech synthesis
//!
//! The `Synthesizer` seam produces complete audio for a piece of text; the
//! speech output serializer owns chunking and delivery. The production
//! implementation calls the ElevenLabs text-to-speech API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

use wink_config::ProviderConfig;

use crate::SpeechError;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const API_BASE: &str = "https://api.elevenlabs.io/v1/text-to-speech";
const MODEL_ID: &str = "eleven_flash_v2_5";
const OUTPUT_FORMAT: &str = "mp3_44100_128";

/// Turns text into spoken audio.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Synthesize `text` into a complete audio buffer (mp3).
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError>;
}

/// ElevenLabs-backed synthesizer.
pub struct ElevenLabsSynthesizer {
    client: Client,
    api_key: String,
    voice_id: String,
}

impl ElevenLabsSynthesizer {
    /// Create a synthesizer. Fails fast when the API key is missing.
    pub fn new(providers: &ProviderConfig) -> Result<Self, SpeechError> {
        let api_key = providers
            .require_elevenlabs_key()
            .map_err(|e| SpeechError::Configuration(e.to_string()))?
            .to_string();

        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SpeechError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            api_key,
            voice_id: providers.elevenlabs_voice_id.clone(),
        })
    }
}

#[async_trait]
impl Synthesizer for ElevenLabsSynthesizer {
    async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SpeechError> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let url = format!("{}/{}", API_BASE, self.voice_id);
        let response = self
            .client
            .post(&url)
            .query(&[("output_format", OUTPUT_FORMAT)])
            .header("xi-api-key", &self.api_key)
            .json(&json!({
                "text": text,
                "model_id": MODEL_ID,
                "voice_settings": {
                    "stability": 0.5,
                    "similarity_boost": 0.75,
                },
            }))
            .send()
            .await
            .map_err(|e| SpeechError::Connection(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(SpeechError::Provider(format!(
                "ElevenLabs returned {}: {}",
                status, body
            )));
        }

        let audio = response
            .bytes()
            .await
            .map_err(|e| SpeechError::Connection(e.to_string()))?;

        Ok(audio.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthesizer_requires_api_key() {
        let providers = ProviderConfig {
            elevenlabs_api_key: None,
            ..ProviderConfig::default()
        };
        assert!(matches!(
            ElevenLabsSynthesizer::new(&providers),
            Err(SpeechError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_empty_text_synthesizes_to_empty_audio() {
        let providers = ProviderConfig {
            elevenlabs_api_key: Some("key".to_string()),
            ..ProviderConfig::default()
        };
        let synth = ElevenLabsSynthesizer::new(&providers).unwrap();
        let audio = synth.synthesize("   ").await.unwrap();
        assert!(audio.is_empty());
    }
}
