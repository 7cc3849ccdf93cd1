//! Agent-level events.
//!
//! `AgentEvent` is what a frontend sees of a running session: streamed text,
//! parsed segments, tool results and the terminal outcome. Events are sent
//! over an optional `tokio::sync::mpsc` channel; a full or closed channel
//! never slows the loop down.

use serde::{Deserialize, Serialize};

use crate::context::TokenUsage;
use crate::loop_runner::AgentState;

/// Events emitted by the agent loop.
///
/// - `state_changed`: the loop moved to a new state
/// - `text_delta`: partial text from the model
/// - `thought`: a `<think>` or `<reflection>` segment
/// - `action`: an action is about to be dispatched
/// - `observation`: an action finished
/// - `retry`: a completion request failed and will be retried
/// - `done`: the session produced a final answer
/// - `failed`: the session stopped without one
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    StateChanged { state: AgentState },

    TextDelta { content: String },

    Thought { content: String },

    Action {
        step: usize,
        name: String,
        input: serde_json::Value,
    },

    Observation {
        step: usize,
        name: Option<String>,
        content: String,
        success: bool,
    },

    Retry {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },

    Done {
        answer: String,
        steps: usize,
        usage: TokenUsage,
    },

    Failed { condition: String, message: String },
}

impl AgentEvent {
    /// Stable event name, matching the serde tag.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::StateChanged { .. } => "state_changed",
            Self::TextDelta { .. } => "text_delta",
            Self::Thought { .. } => "thought",
            Self::Action { .. } => "action",
            Self::Observation { .. } => "observation",
            Self::Retry { .. } => "retry",
            Self::Done { .. } => "done",
            Self::Failed { .. } => "failed",
        }
    }
}
