//! Wink Brain
//!
//! The conversation layer: a wake-phrase/timeout/pending-confirmation state
//! machine that decides whether a transcript is ignored, answered, or
//! escalated to intent resolution, plus the `IntentResolver` seam and its
//! OpenRouter-backed implementation.

pub mod conversation;
pub mod intent;
pub mod openrouter;

pub use conversation::{Conversation, TurnOutcome};
pub use intent::{DeviceDirectory, DeviceInfo, IntentResolver, Reply};
pub use openrouter::OpenRouterResolver;

use thiserror::Error;

/// Brain errors
#[derive(Error, Debug)]
pub enum BrainError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Malformed provider response: {0}")]
    Parse(String),
}
