//! Intent resolution seam
//!
//! Intent classification itself is a model concern and lives behind the
//! `IntentResolver` trait; the conversation layer only depends on the
//! closed set of reply variants it can produce.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use wink_core::{DeviceAction, MessageHistory, TaskStatus};

use crate::BrainError;

/// Result of resolving one user turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// A conversational answer with no device action.
    Answer { text: String },
    /// An answer plus an action to execute immediately.
    Action { text: String, action: DeviceAction },
    /// An answer plus an action that must be confirmed by the user before
    /// it is executed. The action becomes the session's pending action.
    ProposedAction { text: String, action: DeviceAction },
}

impl Reply {
    pub fn text(&self) -> &str {
        match self {
            Reply::Answer { text }
            | Reply::Action { text, .. }
            | Reply::ProposedAction { text, .. } => text,
        }
    }
}

/// Resolves a transcript (plus visual and task context) into a reply.
#[async_trait]
pub trait IntentResolver: Send + Sync {
    async fn resolve(
        &self,
        transcript: &str,
        latest_frame: Option<&[u8]>,
        history: &MessageHistory,
        task_status: Option<&TaskStatus>,
    ) -> Result<Reply, BrainError>;
}

/// A controllable device as advertised to intent resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

/// Source of the currently registered devices.
///
/// Implemented by the server's device registry; the resolver reads it fresh
/// on every call so the prompt always reflects live registrations.
pub trait DeviceDirectory: Send + Sync {
    fn devices(&self) -> Vec<DeviceInfo>;
}
