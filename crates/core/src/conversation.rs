//! Conversation history
//!
//! A bounded, ordered buffer of user/assistant turns. The bound keeps both
//! memory and the context window sent to intent resolution from growing
//! without limit: at most `max_turns` user+assistant pairs are retained,
//! oldest trimmed first.

use serde::{Deserialize, Serialize};

/// Default number of retained turns (one turn = user + assistant message).
pub const DEFAULT_MAX_TURNS: usize = 10;

/// Role of a message in the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A single conversation message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered, bounded message history.
#[derive(Debug, Clone)]
pub struct MessageHistory {
    messages: Vec<Message>,
    max_turns: usize,
}

impl MessageHistory {
    pub fn new(max_turns: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_turns,
        }
    }

    pub fn push_user(&mut self, content: impl Into<String>) {
        self.messages.push(Message::user(content));
        self.trim();
    }

    pub fn push_assistant(&mut self, content: impl Into<String>) {
        self.messages.push(Message::assistant(content));
        self.trim();
    }

    /// Record a complete turn: what the user said and what was answered.
    pub fn push_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.messages.push(Message::user(user));
        self.messages.push(Message::assistant(assistant));
        self.trim();
    }

    fn trim(&mut self) {
        let max_messages = self.max_turns * 2;
        if self.messages.len() > max_messages {
            let excess = self.messages.len() - max_messages;
            self.messages.drain(..excess);
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }
}

impl Default for MessageHistory {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}
