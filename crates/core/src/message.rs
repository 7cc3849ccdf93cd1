//! Message domain types.
//!
//! A message is one turn in the conversation: the system prompt, the user's
//! task, the model's raw turn text, or an observation produced by a tool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    /// System instructions (never pruned)
    #[serde(rename = "system")]
    System,
    /// The end user
    #[serde(rename = "user")]
    User,
    /// The model's turn text
    #[serde(rename = "assistant")]
    Assistant,
    /// The textual result of executing an action
    #[serde(rename = "tool-observation")]
    Observation,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Observation => "tool-observation",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Unique message ID
    pub id: String,

    /// Who produced this message
    pub role: Role,

    /// The text content
    pub content: String,

    /// Estimated token count, fixed when the message enters a conversation
    #[serde(default)]
    pub tokens: usize,

    /// Timestamp
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Create a message with a precomputed token estimate.
    pub fn new(role: Role, content: impl Into<String>, tokens: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            tokens,
            timestamp: Utc::now(),
        }
    }

    /// Create a new system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, 0)
    }

    /// Create a new user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, 0)
    }

    /// Create a new assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, 0)
    }

    /// Create a new observation message.
    pub fn observation(content: impl Into<String>) -> Self {
        Self::new(Role::Observation, content, 0)
    }
}
