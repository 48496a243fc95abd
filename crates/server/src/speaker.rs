//! Speech output serializer
//!
//! All spoken output for a session funnels through one `Speaker`. An async
//! mutex serializes utterances so concurrent turn tasks and task-completion
//! announcements cannot interleave their audio chunk streams on the socket.

use std::sync::Arc;

use async_trait::async_trait;

use wink_core::{ServerEvent, StatusState};
use wink_speech::Synthesizer;

use crate::ServerError;

/// Outbound side of a client session socket.
#[async_trait]
pub trait OutboundChannel: Send + Sync {
    async fn send_event(&self, event: &ServerEvent) -> Result<(), ServerError>;
    async fn send_binary(&self, payload: Vec<u8>) -> Result<(), ServerError>;
}

/// Serializes spoken replies onto one session's socket.
pub struct Speaker {
    channel: Arc<dyn OutboundChannel>,
    synthesizer: Arc<dyn Synthesizer>,
    chunk_bytes: usize,
}

impl Speaker {
    pub fn new(
        channel: Arc<dyn OutboundChannel>,
        synthesizer: Arc<dyn Synthesizer>,
        chunk_bytes: usize,
    ) -> Self {
        Self {
            channel,
            synthesizer,
            chunk_bytes,
        }
    }

    /// Speak one utterance: the reply text event, then the synthesized audio
    /// as `tts_start`, binary chunks, `tts_end`.
    ///
    /// Serialization is the caller's concern only in that `speak` must be
    /// awaited from within the session; internally the whole utterance runs
    /// under the speech lock held by [`SerialSpeaker::speak`]. Synthesis
    /// failures surface to the client as an error status and are absorbed.
    async fn speak_inner(&self, text: &str) -> Result<(), ServerError> {
        self.channel
            .send_event(&ServerEvent::AssistantText {
                text: text.to_string(),
            })
            .await?;

        let audio = match self.synthesizer.synthesize(text).await {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "speech synthesis failed");
                self.channel
                    .send_event(&ServerEvent::status(
                        StatusState::Error,
                        format!("Speech synthesis failed: {}", e),
                    ))
                    .await?;
                return Ok(());
            },
        };

        if audio.is_empty() {
            return Ok(());
        }

        self.channel.send_event(&ServerEvent::TtsStart).await?;
        for chunk in audio.chunks(self.chunk_bytes) {
            self.channel.send_binary(chunk.to_vec()).await?;
        }
        self.channel.send_event(&ServerEvent::TtsEnd).await
    }
}

/// A `Speaker` guarded by the per-session speech lock.
pub struct SerialSpeaker {
    inner: Speaker,
    gate: tokio::sync::Mutex<()>,
}

impl SerialSpeaker {
    pub fn new(
        channel: Arc<dyn OutboundChannel>,
        synthesizer: Arc<dyn Synthesizer>,
        chunk_bytes: usize,
    ) -> Self {
        Self {
            inner: Speaker::new(channel, synthesizer, chunk_bytes),
            gate: tokio::sync::Mutex::new(()),
        }
    }

    /// Speak one utterance, waiting for any in-flight utterance to finish
    /// first. Socket failures are logged and absorbed; the lock is released
    /// either way.
    pub async fn speak(&self, text: &str) {
        let _guard = self.gate.lock().await;
        if let Err(e) = self.inner.speak_inner(text).await {
            tracing::warn!(error = %e, "failed to deliver spoken reply");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use wink_speech::SpeechError;

    #[derive(Default)]
    struct RecordingChannel {
        frames: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl OutboundChannel for RecordingChannel {
        async fn send_event(&self, event: &ServerEvent) -> Result<(), ServerError> {
            self.frames
                .lock()
                .push(serde_json::to_string(event).map_err(|e| ServerError::Internal(e.to_string()))?);
            Ok(())
        }

        async fn send_binary(&self, payload: Vec<u8>) -> Result<(), ServerError> {
            self.frames.lock().push(format!("binary:{}", payload.len()));
            Ok(())
        }
    }

    struct FixedSynthesizer(Vec<u8>);

    #[async_trait]
    impl Synthesizer for FixedSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, SpeechError> {
            Ok(self.0.clone())
        }
    }

    struct FailingSynthesizer;

    #[async_trait]
    impl Synthesizer for FailingSynthesizer {
        async fn synthesize(&self, _text: &str) -> Result<Vec<u8>, SpeechError> {
            Err(SpeechError::Provider("boom".to_string()))
        }
    }

    #[tokio::test]
    async fn test_utterance_brackets_chunked_audio() {
        let channel = Arc::new(RecordingChannel::default());
        let speaker = SerialSpeaker::new(
            channel.clone(),
            Arc::new(FixedSynthesizer(vec![0u8; 10])),
            4,
        );

        speaker.speak("hello").await;

        let frames = channel.frames.lock().clone();
        assert_eq!(
            frames,
            vec![
                r#"{"type":"assistant_text","text":"hello"}"#.to_string(),
                r#"{"type":"tts_start"}"#.to_string(),
                "binary:4".to_string(),
                "binary:4".to_string(),
                "binary:2".to_string(),
                r#"{"type":"tts_end"}"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_empty_audio_skips_tts_frames() {
        let channel = Arc::new(RecordingChannel::default());
        let speaker = SerialSpeaker::new(channel.clone(), Arc::new(FixedSynthesizer(vec![])), 4);

        speaker.speak("hello").await;

        let frames = channel.frames.lock().clone();
        assert_eq!(frames.len(), 1);
        assert!(frames[0].contains("assistant_text"));
    }

    #[tokio::test]
    async fn test_synthesis_failure_reports_error_and_releases_lock() {
        let channel = Arc::new(RecordingChannel::default());
        let speaker = Arc::new(SerialSpeaker::new(
            channel.clone(),
            Arc::new(FailingSynthesizer),
            4,
        ));

        speaker.speak("first").await;
        // A second utterance must not deadlock on the speech lock.
        speaker.speak("second").await;

        let frames = channel.frames.lock().clone();
        assert_eq!(frames.len(), 4);
        assert!(frames[1].contains("Speech synthesis failed"));
        assert!(frames[3].contains("Speech synthesis failed"));
    }

    #[tokio::test]
    async fn test_concurrent_utterances_do_not_interleave() {
        let channel = Arc::new(RecordingChannel::default());
        let speaker = Arc::new(SerialSpeaker::new(
            channel.clone(),
            Arc::new(FixedSynthesizer(vec![0u8; 8])),
            4,
        ));

        let a = {
            let speaker = speaker.clone();
            tokio::spawn(async move { speaker.speak("one").await })
        };
        let b = {
            let speaker = speaker.clone();
            tokio::spawn(async move { speaker.speak("two").await })
        };
        a.await.unwrap();
        b.await.unwrap();

        // Each utterance is 5 frames; the two blocks must be contiguous.
        let frames = channel.frames.lock().clone();
        assert_eq!(frames.len(), 10);
        assert!(frames[0].contains("assistant_text"));
        assert_eq!(frames[1], r#"{"type":"tts_start"}"#);
        assert_eq!(frames[4], r#"{"type":"tts_end"}"#);
        assert!(frames[5].contains("assistant_text"));
        assert_eq!(frames[6], r#"{"type":"tts_start"}"#);
        assert_eq!(frames[9], r#"{"type":"tts_end"}"#);
    }
}
