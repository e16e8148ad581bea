//! Bounded exponential backoff for channel reconnection

use crate::config::ChannelConfig;
use std::time::Duration;

/// Retry schedule for unclean disconnects
///
/// `attempt_count` resets on every successful open and is incremented before
/// each retry is scheduled, so the n-th retry waits
/// `min(max_delay, base_delay * multiplier^n)`.
#[derive(Debug, Clone)]
pub(crate) struct ReconnectPolicy {
    base_delay: Duration,
    multiplier: f64,
    max_delay: Duration,
    max_attempts: u32,
    attempt_count: u32,
}

impl ReconnectPolicy {
    pub(crate) fn new(
        base_delay: Duration,
        multiplier: f64,
        max_delay: Duration,
        max_attempts: u32,
    ) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
            max_attempts,
            attempt_count: 0,
        }
    }

    pub(crate) fn from_config(config: &ChannelConfig) -> Self {
        Self::new(
            config.base_delay(),
            config.multiplier,
            config.max_delay(),
            config.max_attempts,
        )
    }

    pub(crate) fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub(crate) fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether the retry budget is spent
    pub(crate) fn is_exhausted(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    /// Delay before the `attempt`-th retry
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.powi(attempt as i32);
        let millis = self.base_delay.as_millis() as f64 * factor;
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Count an unclean close and return the delay before the next retry,
    /// or `None` when no further retries are allowed
    pub(crate) fn next_delay(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        self.attempt_count += 1;
        Some(self.delay_for(self.attempt_count))
    }

    /// Called on every successful open
    pub(crate) fn reset(&mut self) {
        self.attempt_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(3000),
            1.5,
            Duration::from_millis(30000),
            10,
        )
    }

    #[test]
    fn test_nth_retry_delay_is_capped_exponential() {
        let mut policy = policy();
        for n in 1..=10u32 {
            let expected = (3000.0 * 1.5f64.powi(n as i32)).min(30000.0) as u64;
            assert_eq!(
                policy.next_delay(),
                Some(Duration::from_millis(expected)),
                "retry {}",
                n
            );
            assert_eq!(policy.attempt_count(), n);
        }
    }

    #[test]
    fn test_first_retries_before_cap() {
        let mut policy = policy();
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(4500)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(6750)));
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(10125)));
    }

    #[test]
    fn test_no_retry_once_budget_spent() {
        let mut policy = ReconnectPolicy::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
            3,
        );
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.next_delay().is_some());
        assert!(policy.is_exhausted());
        assert_eq!(policy.next_delay(), None);
        assert_eq!(policy.attempt_count(), 3);
    }

    #[test]
    fn test_reset_restores_budget() {
        let mut policy = policy();
        policy.next_delay();
        policy.next_delay();
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.next_delay(), Some(Duration::from_millis(4500)));
    }

    #[test]
    fn test_zero_attempt_budget_never_retries() {
        let mut policy = ReconnectPolicy::new(
            Duration::from_millis(100),
            2.0,
            Duration::from_secs(1),
            0,
        );
        assert_eq!(policy.next_delay(), None);
    }
}
