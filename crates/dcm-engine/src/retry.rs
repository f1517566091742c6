//! Setup retry policy

use std::time::Duration;

use dcm_protocol::SuggestedRetry;
use serde::{Deserialize, Serialize};

/// Quadratic backoff for failed setups
///
/// The n-th retry (counting from zero) waits `factor * n^2 + origin`
/// seconds unless the network suggested a time. After `max_retries`
/// scheduled attempts the budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Quadratic factor in seconds
    pub factor_secs: u64,
    /// Constant offset in seconds
    pub origin_secs: u64,
    /// Scheduled attempts before giving up
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            factor_secs: 8,
            origin_secs: 3,
            max_retries: 10,
        }
    }
}

impl RetryPolicy {
    /// Backoff delay for the given retry count
    pub fn backoff(&self, retry_count: u32) -> Duration {
        let n = u64::from(retry_count);
        let secs = self
            .factor_secs
            .saturating_mul(n.saturating_mul(n))
            .saturating_add(self.origin_secs);
        Duration::from_secs(secs)
    }

    /// Delay before the next attempt
    ///
    /// None once the budget is spent or when the network asked for no retry.
    pub fn next_delay(&self, retry_count: u32, suggested: SuggestedRetry) -> Option<Duration> {
        if retry_count >= self.max_retries {
            return None;
        }
        match suggested {
            SuggestedRetry::After(delay) => Some(delay),
            SuggestedRetry::None => Some(self.backoff(retry_count)),
            SuggestedRetry::Never => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_backoff_sequence() {
        let policy = RetryPolicy::default();
        let secs: Vec<u64> = (0..4).map(|n| policy.backoff(n).as_secs()).collect();
        assert_eq!(secs, vec![3, 11, 35, 75]);
    }

    #[test]
    fn test_suggested_time_wins() {
        let policy = RetryPolicy::default();
        let delay = policy.next_delay(5, SuggestedRetry::After(Duration::from_millis(1500)));
        assert_eq!(delay, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_never_means_no_retry() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(0, SuggestedRetry::Never), None);
    }

    #[test]
    fn test_budget_exhaustion() {
        let policy = RetryPolicy::default();
        assert!(policy.next_delay(9, SuggestedRetry::None).is_some());
        assert_eq!(policy.next_delay(10, SuggestedRetry::None), None);
        // A suggestion does not extend the budget
        assert_eq!(
            policy.next_delay(10, SuggestedRetry::After(Duration::from_secs(1))),
            None
        );
    }

    proptest! {
        #[test]
        fn backoff_never_shrinks(n in 0u32..1000) {
            let policy = RetryPolicy::default();
            prop_assert!(policy.backoff(n + 1) >= policy.backoff(n));
        }
    }
}
