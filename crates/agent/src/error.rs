//! Terminal outcomes of a session.
//!
//! Recoverable action failures never show up here; they are observations.
//! An [`AgentError`] means the loop stopped without a final answer.

use rustact_core::error::ProviderError;
use serde::Serialize;
use thiserror::Error;

use crate::context::TokenUsage;

/// State of the session at the moment it stopped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StopSummary {
    /// Completed steps
    pub steps: usize,
    /// The last action attempted, in call syntax
    pub last_action: Option<String>,
    pub usage: TokenUsage,
}

impl std::fmt::Display for StopSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "after {} step(s), {}", self.steps, self.usage)?;
        if let Some(action) = &self.last_action {
            write!(f, ", last action {action}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("gave up without a final answer {0}")]
    StepLimitExceeded(StopSummary),

    #[error("context budget exhausted by the system prompt {0}")]
    ContextBudgetExhausted(StopSummary),

    #[error("completion transport failed: {source} ({summary})")]
    Transport {
        #[source]
        source: ProviderError,
        summary: StopSummary,
    },

    #[error("cancelled {0}")]
    Cancelled(StopSummary),
}

impl AgentError {
    pub fn summary(&self) -> &StopSummary {
        match self {
            Self::StepLimitExceeded(s) | Self::ContextBudgetExhausted(s) | Self::Cancelled(s) => s,
            Self::Transport { summary, .. } => summary,
        }
    }

    /// Stable condition name for reporting.
    pub fn condition(&self) -> &'static str {
        match self {
            Self::StepLimitExceeded(_) => "StepLimitExceeded",
            Self::ContextBudgetExhausted(_) => "ContextBudgetExhausted",
            Self::Transport { .. } => "Transport",
            Self::Cancelled(_) => "Cancelled",
        }
    }

    /// Whether re-running the whole task could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
