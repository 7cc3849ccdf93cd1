//! The agent loop: a tag-driven Reason → Act → Observe cycle.
//!
//! 1. **Seed** the session with the system prompt and the user's task
//! 2. **Stream** a model turn and parse its `<think>`, `<action>` and
//!    `<final_answer>` segments as they arrive
//! 3. **Dispatch** each action, in order, and append its observation
//! 4. **Loop** back to step 2 until a final answer or a terminal condition
//!
//! History is owned by a per-session [`ContextManager`], which keeps it under
//! a token budget by pruning the oldest non-system messages.

pub mod context;
pub mod dispatcher;
pub mod error;
pub mod loop_runner;
pub mod parser;
pub mod prompt;
pub mod retry;
pub mod stream_event;
pub mod transcript;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use context::{
    ContextConfig, ContextManager, HeuristicEstimator, PruneReport, TokenEstimator, TokenUsage,
};
pub use dispatcher::{DispatchConfig, Observation, ToolDispatcher};
pub use error::{AgentError, StopSummary};
pub use loop_runner::{AgentLoop, AgentState, LoopConfig, Session, SessionReport};
pub use parser::{
    ActionParseError, ParsedAction, ResponseParser, Segment, format_action, parse_response,
};
pub use retry::RetryPolicy;
pub use stream_event::AgentEvent;
pub use transcript::{Transcript, TranscriptEntry};
