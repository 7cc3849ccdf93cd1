//! Conversation history under a token budget.
//!
//! The [`ContextManager`] is the single writer of a session's messages. It
//! estimates each message once, at insertion, and prunes the oldest
//! non-system messages whenever the running total exceeds
//! `max_tokens - safety_margin`.

pub mod manager;
pub mod token;

pub use manager::{ContextConfig, ContextManager, PruneReport, TokenUsage};
pub use token::{HeuristicEstimator, TokenEstimator, estimate_tokens};
