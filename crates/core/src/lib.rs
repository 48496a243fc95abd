//! Wink Core
//!
//! Shared types used across the Wink assistant backend: the client and
//! device wire protocols, conversation history, device task state, and the
//! bounded audio ingestion queue.

pub mod audio;
pub mod conversation;
pub mod protocol;
pub mod task;

pub use audio::AudioQueue;
pub use conversation::{Message, MessageHistory, Role};
pub use protocol::{
    ClientEnvelope, DeviceCommand, DeviceEvent, PendingBinaryPayload, PayloadKind, ServerEvent,
    StatusState,
};
pub use task::{DeviceAction, TaskState, TaskStatus};
