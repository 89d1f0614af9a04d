//! Retry policy with exponential backoff
//!
//! Used by the batch runner: attempts are bounded, the delay doubles each
//! round and is capped at ten minutes.

use std::time::Duration;

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first
    pub max_attempts: u32,
    /// Delay base for the backoff schedule
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
    /// Multiplier applied per attempt (2.0 doubles the delay each round)
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 50,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(600),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create the default policy
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy with a single attempt (fail immediately)
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the delay base
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the delay cap
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Set the backoff multiplier
    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Delay to sleep before the given attempt (1-indexed).
    ///
    /// The first attempt starts immediately; attempt `n` waits
    /// `initial_delay * multiplier^(n-1)`, capped at `max_delay`. With the
    /// defaults that is 2 s, 4 s, 8 s, ... up to 600 s.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        // Cap the exponent so the f64 never overflows into the cap check.
        let exponent = (attempt - 1).min(32);
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent as i32);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts, 50);
        assert_eq!(policy.max_delay, Duration::from_secs(600));
    }

    #[test]
    fn test_delay_schedule_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(1), Duration::ZERO);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(8));
    }

    #[test]
    fn test_delay_capped_at_ten_minutes() {
        let policy = RetryPolicy::default();
        // 2^10 = 1024 s exceeds the 600 s cap.
        assert_eq!(policy.delay_for_attempt(11), Duration::from_secs(600));
        assert_eq!(policy.delay_for_attempt(50), Duration::from_secs(600));
    }

    #[test]
    fn test_large_attempt_does_not_overflow() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_secs(600));
    }

    #[test]
    fn test_no_retry() {
        let policy = RetryPolicy::no_retry();
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_min_one_attempt() {
        let policy = RetryPolicy::new().with_max_attempts(0);
        assert_eq!(policy.max_attempts, 1);
    }

    #[test]
    fn test_fixed_delay_via_multiplier_one() {
        let policy = RetryPolicy::new()
            .with_initial_delay(Duration::from_millis(100))
            .with_multiplier(1.0);
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(9), Duration::from_millis(100));
    }
}
