//! Retry backoff policy.
//!
//! The delay before a failed job becomes eligible again grows
//! exponentially with the attempt count: base 5s, doubling per
//! attempt, capped at 300s.

use std::time::Duration;

/// Backoff curve applied between failed attempts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failure (doubles each further attempt).
    pub base_delay: Duration,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay before retry number `attempt` (1-based: the first failure
    /// produces attempt 1).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay.saturating_mul(2u32.pow(exponent));
        delay.min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_per_attempt() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(10));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(20));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(40));
    }

    #[test]
    fn test_delay_is_capped() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for_attempt(10), Duration::from_secs(300));
        assert_eq!(policy.delay_for_attempt(60), Duration::from_secs(300));
    }
}
