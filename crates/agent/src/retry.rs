//! Exponential backoff for completion requests.
//!
//! Only transient [`ProviderError`]s are retried (network, rate limit,
//! timeout, 5xx, interrupted stream). A rate limit's `retry_after` is a floor
//! on the computed delay.

use rustact_config::AgentSettings;
use rustact_core::error::ProviderError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (0 = fail immediately)
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&AgentSettings::default())
    }
}

impl From<&AgentSettings> for RetryPolicy {
    fn from(s: &AgentSettings) -> Self {
        Self {
            max_retries: s.max_retries,
            initial_delay: Duration::from_millis(s.retry_initial_delay_ms),
            max_delay: Duration::from_millis(s.retry_max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed), or `None` when `err`
    /// is permanent or retries are used up.
    pub fn next_delay(&self, attempt: u32, err: &ProviderError) -> Option<Duration> {
        if !err.is_transient() || attempt >= self.max_retries {
            return None;
        }
        let delay = self.delay_for_attempt(attempt);
        Some(match err.retry_after() {
            Some(floor) => delay.max(floor),
            None => delay,
        })
    }

    /// `initial_delay * 2^attempt`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_delay
            .checked_mul(factor)
            .map_or(self.max_delay, |d| d.min(self.max_delay))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(8),
        }
    }

    #[test]
    fn delay_doubles_until_capped() {
        let p = policy();
        assert_eq!(p.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(p.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(p.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(p.delay_for_attempt(5), Duration::from_secs(8));
        assert_eq!(p.delay_for_attempt(40), Duration::from_secs(8));
    }

    #[test]
    fn permanent_errors_not_retried() {
        let p = policy();
        assert!(p
            .next_delay(0, &ProviderError::AuthenticationFailed("bad key".into()))
            .is_none());
        assert!(p
            .next_delay(
                0,
                &ProviderError::ApiError {
                    status_code: 400,
                    message: "bad request".into()
                }
            )
            .is_none());
    }

    #[test]
    fn transient_errors_retried_until_exhausted() {
        let p = policy();
        let err = ProviderError::Network("connection reset".into());
        assert!(p.next_delay(0, &err).is_some());
        assert!(p.next_delay(2, &err).is_some());
        assert!(p.next_delay(3, &err).is_none());
        assert!(RetryPolicy::none().next_delay(0, &err).is_none());
    }

    #[test]
    fn rate_limit_sets_a_floor() {
        let p = policy();
        let err = ProviderError::RateLimited {
            retry_after_secs: 5,
        };
        assert_eq!(p.next_delay(0, &err), Some(Duration::from_secs(5)));
        assert_eq!(p.next_delay(2, &err), Some(Duration::from_secs(5)));
    }

    #[test]
    fn from_settings() {
        let p = RetryPolicy::from(&AgentSettings::default());
        assert_eq!(p.max_retries, 3);
        assert_eq!(p.initial_delay, Duration::from_millis(500));
        assert_eq!(p.max_delay, Duration::from_millis(8000));
    }
}
