//! Conversation history threading.
//!
//! The context is owned by the caller (one per end-user session) and passed
//! into each answer call; the engine itself holds no conversation state.

use serde::{Deserialize, Serialize};

/// Speaker role for a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One turn of a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

impl Turn {
    /// Create a system turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Append-only conversation history with a bounded prompt window.
///
/// The full log is kept for the lifetime of the value; only the most recent
/// `max_window` turns are threaded into each prompt, so history growth cannot
/// inflate requests without bound.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    turns: Vec<Turn>,
    max_window: usize,
}

impl ConversationContext {
    /// Create an empty context with the given prompt window size.
    pub fn new(max_window: usize) -> Self {
        Self {
            turns: Vec::new(),
            max_window,
        }
    }

    /// Append a user turn.
    pub fn append_user(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::user(content));
    }

    /// Append an assistant turn.
    pub fn append_assistant(&mut self, content: impl Into<String>) {
        self.turns.push(Turn::assistant(content));
    }

    /// Forget all recorded turns.
    pub fn clear(&mut self) {
        self.turns.clear();
    }

    /// All recorded turns, oldest first.
    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    /// The most recent turns that fit the prompt window.
    pub fn window(&self) -> &[Turn] {
        let start = self.turns.len().saturating_sub(self.max_window);
        &self.turns[start..]
    }

    /// Number of recorded turns.
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Whether no turns have been recorded.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new(20)
    }
}
