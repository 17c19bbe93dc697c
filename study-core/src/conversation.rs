//! Conversation state machine for one study session.
//!
//! ```text
//! EMPTY --reset--> INITIALIZED --submit_user--> AWAITING_RESPONSE
//!                       ^                              |
//!                       +----- commit_assistant -------+
//! any state --reset--> INITIALIZED (prior turns discarded)
//! ```
//!
//! Index 0 is always the system prompt once initialized.

use serde::Serialize;

use crate::models::{Message, Role};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationState {
    Empty,
    Initialized,
    AwaitingResponse,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversation {
    messages: Vec<Message>,
}

impl Conversation {
    /// An `EMPTY` conversation.
    pub fn new() -> Self {
        Self::default()
    }

    /// An `INITIALIZED` conversation holding only `prompt`.
    pub fn with_system(prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(prompt)],
        }
    }

    /// Replace everything with a single system message. Any unanswered user
    /// message is dropped.
    pub fn reset(&mut self, prompt: impl Into<String>) {
        self.messages.clear();
        self.messages.push(Message::system(prompt));
    }

    /// Append a user message. An `EMPTY` conversation is first reset with
    /// `current_prompt`.
    pub fn submit_user(&mut self, text: impl Into<String>, current_prompt: impl FnOnce() -> String) {
        if self.messages.is_empty() {
            tracing::debug!("Conversation empty on submit, restoring system prompt");
            self.reset(current_prompt());
        }
        self.messages.push(Message::user(text));
    }

    /// Commit a finished assistant reply. Empty replies are not recorded.
    /// Returns whether a message was appended.
    pub fn commit_assistant(&mut self, text: String) -> bool {
        if text.is_empty() {
            return false;
        }
        self.messages.push(Message::assistant(text));
        true
    }

    pub fn state(&self) -> ConversationState {
        match self.messages.last() {
            None => ConversationState::Empty,
            Some(m) if m.role == Role::User => ConversationState::AwaitingResponse,
            Some(_) => ConversationState::Initialized,
        }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Everything after the system prompt.
    pub fn visible(&self) -> &[Message] {
        match self.messages.first() {
            Some(m) if m.role == Role::System => &self.messages[1..],
            _ => &self.messages,
        }
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.messages
            .first()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
