//! Reconnect backoff policy.
//!
//! Attempt `n` (starting at 1) waits
//!
//! ```text
//! capped = min(base * 2^(n-1), max)
//! delay  = capped + uniform(0, jitter_fraction) * capped
//! ```
//!
//! Jitter spreads clients that lost the same server so they do not all
//! come back in the same instant.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use super::config::ClientConfig;

// ============================================================================
// Constants
// ============================================================================

/// Maximum jitter as a fraction of the capped delay.
pub const DEFAULT_JITTER_FRACTION: f64 = 0.1;

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Bounded exponential backoff with an attempt counter.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    jitter_fraction: f64,
    /// Attempts made since the last successful connection.
    attempt: u32,
}

impl ReconnectPolicy {
    /// Creates a policy with the default jitter fraction.
    #[must_use]
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            attempt: 0,
        }
    }

    /// Creates a policy from client configuration.
    #[inline]
    #[must_use]
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.base_delay(), config.max_delay(), config.max_attempts())
    }

    /// Returns the number of attempts made so far.
    #[inline]
    #[must_use]
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Returns the attempt limit.
    #[inline]
    #[must_use]
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Returns `true` once no attempts remain.
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Clears the attempt counter.
    #[inline]
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Advances the counter and returns the new attempt number, or `None`
    /// if the limit is reached.
    pub fn next_attempt(&mut self) -> Option<u32> {
        if self.is_exhausted() {
            return None;
        }

        self.attempt += 1;
        Some(self.attempt)
    }

    /// Returns the capped delay for `attempt`, without jitter.
    #[must_use]
    pub fn base_delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let factor = 1u32.checked_shl(exponent).unwrap_or(u32::MAX);

        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Returns the delay for `attempt` with random jitter.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.jittered(attempt, rand::random::<f64>())
    }

    /// Returns the delay for `attempt` with jitter drawn from `unit`
    /// (clamped to `[0, 1]`).
    #[must_use]
    pub fn jittered(&self, attempt: u32, unit: f64) -> Duration {
        let capped = self.base_delay_for(attempt);
        let jitter = capped.mul_f64(self.jitter_fraction * unit.clamp(0.0, 1.0));

        capped.saturating_add(jitter)
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    fn policy(base_ms: u64, max_ms: u64, attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy::new(
            Duration::from_millis(base_ms),
            Duration::from_millis(max_ms),
            attempts,
        )
    }

    #[test]
    fn test_exponential_growth_is_capped() {
        let policy = policy(1000, 5000, 3);

        assert_eq!(policy.base_delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.base_delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.base_delay_for(3), Duration::from_millis(4000));
        assert_eq!(policy.base_delay_for(4), Duration::from_millis(5000));
        assert_eq!(policy.base_delay_for(60), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_bounds() {
        let policy = policy(1000, 30_000, 5);

        assert_eq!(policy.jittered(1, 0.0), Duration::from_millis(1000));
        assert_eq!(policy.jittered(1, 1.0), Duration::from_millis(1100));
        assert_eq!(policy.jittered(2, 0.5), Duration::from_millis(2100));
        assert_eq!(policy.jittered(1, 7.0), Duration::from_millis(1100));
    }

    #[test]
    fn test_next_attempt_until_exhausted() {
        let mut policy = policy(1000, 5000, 3);

        assert_eq!(policy.next_attempt(), Some(1));
        assert_eq!(policy.next_attempt(), Some(2));
        assert_eq!(policy.next_attempt(), Some(3));
        assert!(policy.is_exhausted());
        assert_eq!(policy.next_attempt(), None);
        assert_eq!(policy.attempt(), 3);

        policy.reset();
        assert_eq!(policy.attempt(), 0);
        assert_eq!(policy.next_attempt(), Some(1));
    }

    #[test]
    fn test_zero_attempts_is_immediately_exhausted() {
        let mut policy = policy(1000, 5000, 0);
        assert!(policy.is_exhausted());
        assert_eq!(policy.next_attempt(), None);
    }

    #[test]
    fn test_from_config() {
        let config = ClientConfig::builder()
            .endpoint("http://localhost")
            .base_delay(Duration::from_millis(250))
            .max_delay(Duration::from_secs(2))
            .max_attempts(7)
            .build()
            .expect("valid config");

        let policy = ReconnectPolicy::from_config(&config);
        assert_eq!(policy.max_attempts(), 7);
        assert_eq!(policy.base_delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.base_delay_for(10), Duration::from_secs(2));
    }

    proptest! {
        #[test]
        fn prop_delay_within_bounds(
            base_ms in 1u64..10_000,
            extra_ms in 0u64..120_000,
            attempt in 1u32..40,
        ) {
            let max_ms = base_ms + extra_ms;
            let policy = policy(base_ms, max_ms, 10);

            let exact = u128::from(base_ms) << (attempt - 1);
            let capped = exact.min(u128::from(max_ms));
            let delay = policy.delay_for(attempt).as_nanos();

            let lower = capped * 1_000_000;
            let upper = capped * 1_100_000 + 1;
            prop_assert!(delay >= lower, "delay {delay} below {lower}");
            prop_assert!(delay <= upper, "delay {delay} above {upper}");
        }

        #[test]
        fn prop_delay_never_decreases(base_ms in 1u64..5_000, attempt in 1u32..30) {
            let policy = policy(base_ms, 60_000, 10);
            prop_assert!(policy.base_delay_for(attempt + 1) >= policy.base_delay_for(attempt));
        }
    }
}
