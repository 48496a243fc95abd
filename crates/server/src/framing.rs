//! Framed binary channel
//!
//! The client socket interleaves JSON control envelopes with raw binary
//! frames. Every binary frame must be announced by the envelope immediately
//! before it, carrying the exact byte length; at most one announcement is
//! outstanding at a time. Announced audio lands on the session's ingestion
//! queue, announced video replaces the latest-frame slot, and anything that
//! does not line up is dropped without killing the session.

use std::sync::Arc;

use parking_lot::Mutex;

use wink_core::{AudioQueue, ClientEnvelope, PendingBinaryPayload};

/// What the router did with one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Audio payload accepted onto the ingestion queue.
    AudioRouted,
    /// Video payload accepted into the latest-frame slot.
    VideoRouted,
    /// Client asked to stop; any pending announcement is cancelled.
    Stopped,
    /// Frame violated the protocol and was discarded.
    Rejected { reason: String },
    /// Frame was unparseable or unannounced; dropped silently.
    Dropped,
}

/// Routes one client's text and binary frames.
///
/// Not shared across tasks: the session read loop owns it, so interior
/// mutability is only needed for the latest-frame slot the turn pipeline
/// reads concurrently.
pub struct FrameRouter {
    pending: Option<PendingBinaryPayload>,
    audio: Arc<AudioQueue>,
    latest_frame: Arc<Mutex<Option<Vec<u8>>>>,
}

impl FrameRouter {
    pub fn new(audio: Arc<AudioQueue>, latest_frame: Arc<Mutex<Option<Vec<u8>>>>) -> Self {
        Self {
            pending: None,
            audio,
            latest_frame,
        }
    }

    /// Handle a text frame: a control envelope announcing a payload, or a
    /// stop request. Malformed JSON is dropped.
    pub fn handle_text(&mut self, raw: &str) -> FrameOutcome {
        let envelope = match serde_json::from_str::<ClientEnvelope>(raw) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(error = %e, "unparseable control envelope");
                return FrameOutcome::Dropped;
            },
        };

        match envelope {
            ClientEnvelope::PcmAudio {
                byte_length,
                format,
                rate,
            } => {
                if self.pending.is_some() {
                    tracing::warn!("audio announced while another payload was pending");
                }
                self.pending = Some(PendingBinaryPayload::audio(byte_length, format, rate));
                FrameOutcome::Dropped
            },
            ClientEnvelope::VideoFrame { byte_length } => {
                if self.pending.is_some() {
                    tracing::warn!("video announced while another payload was pending");
                }
                self.pending = Some(PendingBinaryPayload::video(byte_length));
                FrameOutcome::Dropped
            },
            ClientEnvelope::Stop => {
                self.pending = None;
                FrameOutcome::Stopped
            },
        }
    }

    /// Handle a binary frame against the outstanding announcement.
    pub fn handle_binary(&mut self, payload: Vec<u8>) -> FrameOutcome {
        let Some(pending) = self.pending.take() else {
            tracing::debug!(bytes = payload.len(), "binary frame without announcement, dropping");
            return FrameOutcome::Dropped;
        };

        if payload.len() != pending.expected_byte_length {
            let reason = format!(
                "binary length mismatch: announced {} bytes, received {}",
                pending.expected_byte_length,
                payload.len()
            );
            tracing::warn!(kind = ?pending.kind, %reason, "discarding binary frame");
            return FrameOutcome::Rejected { reason };
        }

        match pending.kind {
            wink_core::PayloadKind::Audio => {
                let evicted = self.audio.push(payload);
                if evicted {
                    tracing::debug!("audio queue full, evicted oldest chunk");
                }
                FrameOutcome::AudioRouted
            },
            wink_core::PayloadKind::Video => {
                *self.latest_frame.lock() = Some(payload);
                FrameOutcome::VideoRouted
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn router() -> (FrameRouter, Arc<AudioQueue>, Arc<Mutex<Option<Vec<u8>>>>) {
        let audio = Arc::new(AudioQueue::new(4));
        let frame = Arc::new(Mutex::new(None));
        (FrameRouter::new(audio.clone(), frame.clone()), audio, frame)
    }

    #[test]
    fn test_announced_audio_reaches_queue() {
        let (mut router, audio, _) = router();
        router.handle_text(r#"{"type":"pcm_audio","byte_length":3,"format":"pcm16","rate":16000}"#);
        let outcome = router.handle_binary(vec![1, 2, 3]);
        assert_eq!(outcome, FrameOutcome::AudioRouted);
        assert_eq!(audio.len(), 1);
    }

    #[test]
    fn test_announced_video_replaces_latest_frame() {
        let (mut router, _, frame) = router();
        router.handle_text(r#"{"type":"video_frame","byte_length":2}"#);
        router.handle_binary(vec![9, 9]);
        router.handle_text(r#"{"type":"video_frame","byte_length":1}"#);
        let outcome = router.handle_binary(vec![7]);
        assert_eq!(outcome, FrameOutcome::VideoRouted);
        assert_eq!(frame.lock().as_deref(), Some(&[7u8][..]));
    }

    #[test]
    fn test_length_mismatch_discards_payload() {
        let (mut router, audio, _) = router();
        router.handle_text(r#"{"type":"pcm_audio","byte_length":5}"#);
        let outcome = router.handle_binary(vec![1, 2]);
        assert!(matches!(outcome, FrameOutcome::Rejected { .. }));
        assert_eq!(audio.len(), 0);
    }

    #[test]
    fn test_mismatch_clears_announcement() {
        let (mut router, audio, _) = router();
        router.handle_text(r#"{"type":"pcm_audio","byte_length":5}"#);
        router.handle_binary(vec![1, 2]);
        // The announcement was consumed; a correctly-sized frame now counts
        // as unannounced.
        let outcome = router.handle_binary(vec![1, 2, 3, 4, 5]);
        assert_eq!(outcome, FrameOutcome::Dropped);
        assert_eq!(audio.len(), 0);
    }

    #[test]
    fn test_unannounced_binary_dropped_silently() {
        let (mut router, audio, frame) = router();
        let outcome = router.handle_binary(vec![1, 2, 3]);
        assert_eq!(outcome, FrameOutcome::Dropped);
        assert_eq!(audio.len(), 0);
        assert!(frame.lock().is_none());
    }

    #[test]
    fn test_malformed_envelope_dropped() {
        let (mut router, _, _) = router();
        assert_eq!(router.handle_text("not json"), FrameOutcome::Dropped);
        assert_eq!(
            router.handle_text(r#"{"type":"unknown_kind"}"#),
            FrameOutcome::Dropped
        );
    }

    #[test]
    fn test_stop_cancels_pending_announcement() {
        let (mut router, audio, _) = router();
        router.handle_text(r#"{"type":"pcm_audio","byte_length":3}"#);
        assert_eq!(router.handle_text(r#"{"type":"stop"}"#), FrameOutcome::Stopped);
        let outcome = router.handle_binary(vec![1, 2, 3]);
        assert_eq!(outcome, FrameOutcome::Dropped);
        assert_eq!(audio.len(), 0);
    }

    #[test]
    fn test_second_announcement_supersedes_first() {
        let (mut router, audio, _) = router();
        router.handle_text(r#"{"type":"pcm_audio","byte_length":3}"#);
        router.handle_text(r#"{"type":"pcm_audio","byte_length":2}"#);
        let outcome = router.handle_binary(vec![1, 2]);
        assert_eq!(outcome, FrameOutcome::AudioRouted);
        assert_eq!(audio.len(), 1);
    }
}
