//! Token estimation utilities.
//!
//! The default estimator is a character heuristic: ~4 characters per token,
//! rounded up. It is accurate within ~10% for BPE tokenizers on English text,
//! and, more importantly for budgeting, deterministic: the same content always
//! yields the same estimate.

/// Pluggable token counting.
///
/// Implementations must be pure: repeated calls with the same text return the
/// same count for the lifetime of a session.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// ⌈chars / 4⌉.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicEstimator;

impl TokenEstimator for HeuristicEstimator {
    fn estimate(&self, text: &str) -> usize {
        estimate_tokens(text)
    }
}

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}
