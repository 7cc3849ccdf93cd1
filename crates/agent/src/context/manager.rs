use rustact_config::ContextSettings;
use rustact_core::message::{Message, Role};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::token::{HeuristicEstimator, TokenEstimator};

/// Budget settings for one conversation.
#[derive(Debug, Clone)]
pub struct ContextConfig {
    pub max_tokens: usize,
    pub safety_margin: usize,
    /// Content longer than this many characters is truncated on append
    pub max_message_chars: usize,
    /// Fixed cost added to every message's estimate
    pub per_message_overhead: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self::from(&ContextSettings::default())
    }
}

impl From<&ContextSettings> for ContextConfig {
    fn from(s: &ContextSettings) -> Self {
        Self {
            max_tokens: s.max_tokens,
            safety_margin: s.safety_margin,
            max_message_chars: s.max_message_chars,
            per_message_overhead: s.per_message_overhead,
        }
    }
}

/// Current token usage, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub used: usize,
    pub max: usize,
}

impl std::fmt::Display for TokenUsage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{} tokens", self.used, self.max)
    }
}

/// Outcome of one [`ContextManager::prune_if_needed`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    /// Messages removed by this call
    pub removed: usize,
    /// Tokens released by this call
    pub freed_tokens: usize,
    /// Still over budget with only system messages left
    pub exhausted: bool,
}

/// Owns the ordered message history of one session.
pub struct ContextManager {
    messages: Vec<Message>,
    total: usize,
    config: ContextConfig,
    estimator: Box<dyn TokenEstimator>,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self::with_estimator(config, Box::new(HeuristicEstimator))
    }

    pub fn with_estimator(config: ContextConfig, estimator: Box<dyn TokenEstimator>) -> Self {
        Self {
            messages: Vec::new(),
            total: 0,
            config,
            estimator,
        }
    }

    /// Append a message. Oversized content is truncated before estimation.
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> &Message {
        let content = truncate_chars(content.into(), self.config.max_message_chars);
        let tokens = self.estimator.estimate(&content) + self.config.per_message_overhead;
        self.total += tokens;
        debug!(role = %role, tokens, total = self.total, "Appended message");
        let index = self.messages.len();
        self.messages.push(Message::new(role, content, tokens));
        &self.messages[index]
    }

    /// Remove the oldest non-system messages until the total fits within
    /// `max_tokens - safety_margin`. Calling it again without new appends
    /// changes nothing.
    pub fn prune_if_needed(&mut self) -> PruneReport {
        let mut report = PruneReport::default();
        let threshold = self.threshold();

        while self.total > threshold {
            let Some(index) = self.messages.iter().position(|m| m.role != Role::System) else {
                report.exhausted = true;
                break;
            };
            let removed = self.messages.remove(index);
            self.total -= removed.tokens;
            report.removed += 1;
            report.freed_tokens += removed.tokens;
        }

        if report.removed > 0 {
            debug!(
                removed = report.removed,
                freed = report.freed_tokens,
                total = self.total,
                "Pruned conversation history"
            );
        }
        if report.exhausted {
            warn!(
                total = self.total,
                threshold, "Context budget exhausted by system messages alone"
            );
        }
        report
    }

    /// Ordered view of the retained messages.
    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn usage(&self) -> TokenUsage {
        TokenUsage {
            used: self.total,
            max: self.config.max_tokens,
        }
    }

    /// Running total of retained token estimates.
    pub fn total_tokens(&self) -> usize {
        self.total
    }

    /// Whether the history is over `max_tokens - safety_margin`. After a
    /// prune this only holds in the exhausted state.
    pub fn is_over_budget(&self) -> bool {
        self.total > self.threshold()
    }

    /// Drop everything except system messages.
    pub fn reset(&mut self) {
        self.messages.retain(|m| m.role == Role::System);
        self.total = self.messages.iter().map(|m| m.tokens).sum();
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    fn threshold(&self) -> usize {
        self.config
            .max_tokens
            .saturating_sub(self.config.safety_margin)
    }
}

/// Cut `text` to at most `max` characters, with a marker naming how much was
/// dropped.
fn truncate_chars(text: String, max: usize) -> String {
    let Some((cut, _)) = text.char_indices().nth(max) else {
        return text;
    };
    let dropped = text[cut..].chars().count();
    format!("{}\n[... truncated {dropped} chars]", &text[..cut])
}
