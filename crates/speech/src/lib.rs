//! Wink Speech
//!
//! External speech providers behind narrow seams: the realtime
//! transcription relay (outbound WebSocket to the provider, one per
//! session) and the `Synthesizer` trait with its ElevenLabs
//! implementation.

pub mod stt;
pub mod tts;

pub use stt::{TranscriptEvent, TranscriptionRelay};
pub use tts::{ElevenLabsSynthesizer, Synthesizer};

use thiserror::Error;

/// Speech provider errors
#[derive(Error, Debug)]
pub enum SpeechError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Provider error: {0}")]
    Provider(String),
}
