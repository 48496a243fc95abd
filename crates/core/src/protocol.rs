//! Wire protocol types
//!
//! JSON envelopes exchanged over the two WebSocket channels: the phone
//! client channel (interleaved text envelopes and binary payloads) and the
//! device channel (text only). All messages are internally tagged on
//! `type` with snake_case variant names.

use serde::{Deserialize, Serialize};

use crate::task::TaskState;

/// Text envelope sent by the phone client.
///
/// `PcmAudio` and `VideoFrame` declare the byte length of the binary frame
/// that must immediately follow; `Stop` requests an idle transition and
/// carries no payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    PcmAudio {
        byte_length: usize,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        format: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rate: Option<u32>,
    },
    VideoFrame {
        byte_length: usize,
    },
    Stop,
}

/// What kind of binary payload a declaration announced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadKind {
    Audio,
    Video,
}

/// Transient per-channel state between a declaring text envelope and the
/// binary frame it announces. Cleared after consumption or on mismatch.
#[derive(Debug, Clone)]
pub struct PendingBinaryPayload {
    pub kind: PayloadKind,
    pub expected_byte_length: usize,
    pub format: Option<String>,
    pub rate: Option<u32>,
}

impl PendingBinaryPayload {
    pub fn audio(expected_byte_length: usize, format: Option<String>, rate: Option<u32>) -> Self {
        Self {
            kind: PayloadKind::Audio,
            expected_byte_length,
            format,
            rate,
        }
    }

    pub fn video(expected_byte_length: usize) -> Self {
        Self {
            kind: PayloadKind::Video,
            expected_byte_length,
            format: None,
            rate: None,
        }
    }
}

/// Status severity/state carried by `laptop_status` events.
///
/// Covers both server-side notices (`info`, `debug`, `warning`, `error`,
/// `idle`) and the device task lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Info,
    Debug,
    Warning,
    Error,
    Idle,
    Queued,
    Started,
    InProgress,
    Completed,
    Failed,
}

impl From<TaskState> for StatusState {
    fn from(state: TaskState) -> Self {
        match state {
            TaskState::Queued => StatusState::Queued,
            TaskState::Started => StatusState::Started,
            TaskState::InProgress => StatusState::InProgress,
            TaskState::Completed => StatusState::Completed,
            TaskState::Failed => StatusState::Failed,
        }
    }
}

/// Message sent from the server to the phone client.
///
/// Synthesized speech itself travels as raw binary frames bracketed by
/// `TtsStart` and `TtsEnd`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PartialTranscript { text: String },
    FinalTranscript { text: String },
    AssistantText { text: String },
    LaptopStatus { state: StatusState, message: String },
    TtsStart,
    TtsEnd,
}

impl ServerEvent {
    pub fn status(state: impl Into<StatusState>, message: impl Into<String>) -> Self {
        ServerEvent::LaptopStatus {
            state: state.into(),
            message: message.into(),
        }
    }
}

/// Message sent by a device over its channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceEvent {
    DeviceRegister {
        device_id: String,
        #[serde(default)]
        platform: Option<String>,
        #[serde(default)]
        capabilities: Vec<String>,
    },
    StatusUpdate {
        device_id: String,
        status: TaskState,
        message: String,
    },
    Pong {
        device_id: String,
    },
}

/// Message sent from the server to a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DeviceCommand {
    Registered { device_id: String, message: String },
    LaptopTask { goal: String },
    Ping,
}
