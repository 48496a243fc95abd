//! Device task types
//!
//! A task is the unit of work relayed to a device: a natural-language goal
//! plus the device that should execute it. The session keeps at most one
//! active `TaskStatus` at a time; a newly dispatched action replaces it.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a dispatched device task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Started,
    InProgress,
    Completed,
    Failed,
}

impl TaskState {
    /// Whether the task is still running from the session's point of view.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            TaskState::Queued | TaskState::Started | TaskState::InProgress
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Started => "started",
            TaskState::InProgress => "in_progress",
            TaskState::Completed => "completed",
            TaskState::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An action to execute on a device.
///
/// Doubles as the pending-action record when intent resolution proposes an
/// action that still needs user confirmation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceAction {
    pub device_id: String,
    pub goal: String,
    #[serde(default = "default_task_type")]
    pub task_type: String,
}

fn default_task_type() -> String {
    "laptop".to_string()
}

impl DeviceAction {
    pub fn new(device_id: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            goal: goal.into(),
            task_type: default_task_type(),
        }
    }

    pub fn with_task_type(mut self, task_type: impl Into<String>) -> Self {
        self.task_type = task_type.into();
        self
    }
}

/// Status of the most recently dispatched device task.
///
/// Mutated by status updates arriving from the device channel and read when
/// building context for the next intent-resolution call, so the assistant
/// stays aware of an in-flight task on subsequent turns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatus {
    pub device_id: String,
    pub goal: String,
    pub state: TaskState,
    pub message: String,
}

impl TaskStatus {
    /// Status for a freshly dispatched action.
    pub fn queued(action: &DeviceAction) -> Self {
        Self {
            device_id: action.device_id.clone(),
            goal: action.goal.clone(),
            state: TaskState::Queued,
            message: String::new(),
        }
    }

    /// Status for an action that could not be dispatched.
    pub fn failed(action: &DeviceAction, message: impl Into<String>) -> Self {
        Self {
            device_id: action.device_id.clone(),
            goal: action.goal.clone(),
            state: TaskState::Failed,
            message: message.into(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// One-line summary injected into the intent-resolution prompt.
    pub fn prompt_context(&self) -> String {
        if self.message.is_empty() {
            format!(
                "Task \"{}\" on device {} is {}.",
                self.goal, self.device_id, self.state
            )
        } else {
            format!(
                "Task \"{}\" on device {} is {}: {}",
                self.goal, self.device_id, self.state, self.message
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(TaskState::Queued.is_active());
        assert!(TaskState::Started.is_active());
        assert!(TaskState::InProgress.is_active());
        assert!(!TaskState::Completed.is_active());
        assert!(!TaskState::Failed.is_active());
    }

    #[test]
    fn test_task_type_defaults_on_deserialize() {
        let action: DeviceAction =
            serde_json::from_str(r#"{"device_id":"laptop-1","goal":"open chrome"}"#).unwrap();
        assert_eq!(action.task_type, "laptop");
    }

    #[test]
    fn test_prompt_context_mentions_goal_and_state() {
        let action = DeviceAction::new("laptop-1", "open chrome");
        let status = TaskStatus::queued(&action);
        let context = status.prompt_context();
        assert!(context.contains("open chrome"));
        assert!(context.contains("queued"));
    }
}
