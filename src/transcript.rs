//! Ordered conversation transcript, replayed in full on every completion call.
//!
//! The transcript is append-only apart from `reset`. Element 0 is always the
//! system directive; it is installed at construction and there is no API that
//! removes or reorders it.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Speaker of a transcript message, serialised lowercase on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single immutable conversation turn.
///
/// `synthetic` marks messages the controller fabricated (the summarisation
/// prompt). It is set at construction and never inferred from content, so a
/// user who happens to type the same phrase is not hidden from display.
#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub synthetic: bool,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn new(role: Role, content: impl Into<String>, synthetic: bool) -> Self {
        Self {
            role,
            content: content.into(),
            synthetic,
            created_at: Utc::now(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, false)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, false)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, false)
    }

    /// A controller-fabricated user message, hidden from display snapshots.
    pub fn synthetic(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, true)
    }
}

/// Ordered sequence of messages with a protected leading system directive.
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    /// Create a transcript holding only the system directive.
    pub fn new(directive: &str) -> Self {
        Self {
            messages: vec![Message::system(directive)],
        }
    }

    /// Append a message. Never fails; insertion order is the only order.
    pub fn append(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Discard everything and reinitialise with a single system message.
    pub fn reset(&mut self, directive: &str) {
        self.messages.clear();
        self.messages.push(Message::system(directive));
    }

    /// Full ordered sequence, including the system directive and synthetic
    /// messages, for replay to the completion service.
    pub fn for_completion(&self) -> &[Message] {
        &self.messages
    }

    /// Human-facing view: skips the system directive and synthetic prompts.
    pub fn for_display(&self) -> Vec<&Message> {
        self.messages
            .iter()
            .skip(1)
            .filter(|m| !m.synthetic)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }
}
