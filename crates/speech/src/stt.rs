//! Realtime transcription relay
//!
//! Owns one long-lived WebSocket connection to the realtime transcription
//! provider for the lifetime of a session. Two loops run concurrently
//! against the split socket: a sender pumping the audio ingestion queue
//! outward, and a receiver classifying provider events into partial and
//! final transcript events. A fatal connection error terminates both; no
//! retry happens here. Reconnection, if wanted, means the orchestrator
//! restarting the whole relay.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;

use wink_config::ProviderConfig;
use wink_core::AudioQueue;

use crate::SpeechError;

/// Transcript events delivered to the session.
///
/// Partials carry the rolling accumulated text for the current utterance;
/// each utterance ends with exactly one `Final`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptEvent {
    Partial(String),
    Final(String),
}

/// Relay between the audio ingestion queue and the transcription provider.
pub struct TranscriptionRelay {
    url: String,
    api_key: String,
    model: String,
}

impl TranscriptionRelay {
    /// Create a relay. Fails fast when the API key is missing.
    pub fn new(providers: &ProviderConfig) -> Result<Self, SpeechError> {
        let api_key = providers
            .require_openai_key()
            .map_err(|e| SpeechError::Configuration(e.to_string()))?
            .to_string();

        Ok(Self {
            url: providers.realtime_url.clone(),
            api_key,
            model: providers.transcribe_model.clone(),
        })
    }

    /// Run the relay until the provider connection fails or the owning task
    /// is cancelled. Transcript events are delivered on `events`; a closed
    /// receiver is treated as session shutdown and ends the relay cleanly.
    pub async fn run(
        &self,
        queue: Arc<AudioQueue>,
        events: mpsc::UnboundedSender<TranscriptEvent>,
    ) -> Result<(), SpeechError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| SpeechError::Connection(e.to_string()))?;
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {}", self.api_key)
                .parse()
                .map_err(|_| SpeechError::Configuration("API key is not valid in a header".to_string()))?,
        );
        request
            .headers_mut()
            .insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

        tracing::info!(url = %self.url, "connecting to realtime transcription provider");
        let (ws, _) = connect_async(request)
            .await
            .map_err(|e| SpeechError::Connection(e.to_string()))?;
        tracing::info!("realtime transcription connection established");

        let (mut ws_tx, mut ws_rx) = ws.split();

        // Configure the transcription session: pcm16 input, server-side
        // voice activity detection deciding utterance boundaries.
        let session_update = json!({
            "type": "transcription_session.update",
            "input_audio_format": "pcm16",
            "input_audio_transcription": {
                "model": self.model,
                "language": "en",
            },
            "turn_detection": {
                "type": "server_vad",
                "threshold": 0.5,
                "prefix_padding_ms": 300,
                "silence_duration_ms": 500,
            },
        });
        ws_tx
            .send(Message::Text(session_update.to_string()))
            .await
            .map_err(|e| SpeechError::Connection(e.to_string()))?;

        let sender = async {
            loop {
                let chunk = queue.pop().await;
                let frame = json!({
                    "type": "input_audio_buffer.append",
                    "audio": BASE64.encode(&chunk),
                });
                if let Err(e) = ws_tx.send(Message::Text(frame.to_string())).await {
                    return Err(SpeechError::Connection(e.to_string()));
                }
            }
        };

        let receiver = async {
            // Deltas accumulate until the provider marks the utterance
            // complete; the accumulator resets on every final.
            let mut partial_text = String::new();

            while let Some(message) = ws_rx.next().await {
                let message = match message {
                    Ok(m) => m,
                    Err(e) => return Err(SpeechError::Connection(e.to_string())),
                };
                let Message::Text(raw) = message else {
                    continue;
                };
                let Ok(event) = serde_json::from_str::<serde_json::Value>(&raw) else {
                    continue;
                };

                let event_type = event.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
                tracing::debug!(event_type, "transcription provider event");

                match event_type {
                    "conversation.item.input_audio_transcription.delta" => {
                        let delta = event.get("delta").and_then(|d| d.as_str()).unwrap_or("");
                        partial_text.push_str(delta);
                        if events
                            .send(TranscriptEvent::Partial(partial_text.clone()))
                            .is_err()
                        {
                            return Ok(());
                        }
                    },
                    "conversation.item.input_audio_transcription.completed" => {
                        partial_text.clear();
                        let transcript = event
                            .get("transcript")
                            .and_then(|t| t.as_str())
                            .unwrap_or("")
                            .to_string();
                        if events.send(TranscriptEvent::Final(transcript)).is_err() {
                            return Ok(());
                        }
                    },
                    "error" => {
                        tracing::warn!(event = %raw, "transcription provider error event");
                    },
                    _ => {},
                }
            }

            Err(SpeechError::Connection(
                "transcription provider closed the connection".to_string(),
            ))
        };

        // Each loop runs until the other fails or the session ends; a
        // fatal error on either side tears the relay down.
        tokio::select! {
            result = sender => result,
            result = receiver => result,
        }
    }
}
