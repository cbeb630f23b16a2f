//! Exponential backoff policy for retried jobs.

use std::time::Duration;

use conveyor_core::defaults;

/// Computes the delay before a failed job re-enters its lane.
///
/// Delay for the n-th failed attempt is `base * 2^(n-1)`, capped at
/// `max_delay`, so successive delays for the same job are non-decreasing.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(defaults::BACKOFF_BASE_DELAY_MS),
            max_delay: Duration::from_millis(defaults::BACKOFF_MAX_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy from explicit bounds.
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
        }
    }

    /// Delay to wait after the given failed attempt (1-based).
    ///
    /// Attempt values below 1 are treated as 1. The doubling exponent is
    /// clamped so the shift cannot overflow before the cap applies.
    pub fn delay_for(&self, attempt: i32) -> Duration {
        let exponent = u32::try_from(attempt.max(1) - 1).unwrap_or(0).min(32);
        let base_ms = self.base_delay.as_millis() as u64;
        let delay_ms = base_ms.saturating_mul(1u64.checked_shl(exponent).unwrap_or(u64::MAX));
        Duration::from_millis(delay_ms).min(self.max_delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_uses_shared_defaults() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_secs(1));
        assert_eq!(policy.max_delay, Duration::from_secs(60));
    }

    #[test]
    fn delays_double_per_attempt() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(4), Duration::from_secs(8));
    }

    #[test]
    fn delays_cap_at_max() {
        let policy = RetryPolicy::new(Duration::from_secs(1), Duration::from_secs(60));
        assert_eq!(policy.delay_for(7), Duration::from_secs(60));
        assert_eq!(policy.delay_for(8), Duration::from_secs(60));
        assert_eq!(policy.delay_for(100), Duration::from_secs(60));
    }

    #[test]
    fn delays_are_monotonic_up_to_cap() {
        let policy = RetryPolicy::default();
        let mut previous = Duration::ZERO;
        for attempt in 1..=20 {
            let delay = policy.delay_for(attempt);
            assert!(
                delay >= previous,
                "delay for attempt {} regressed: {:?} < {:?}",
                attempt,
                delay,
                previous
            );
            assert!(delay <= policy.max_delay);
            previous = delay;
        }
    }

    #[test]
    fn nonpositive_attempts_behave_like_first() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(0), policy.delay_for(1));
        assert_eq!(policy.delay_for(-5), policy.delay_for(1));
    }
}
