//! # Reconnect backoff.
//!
//! The delay for attempt `n` is `first × factor^n`, clamped to `max`. The base
//! is derived from the attempt number alone, so the delay for a given attempt
//! never depends on earlier ones. The session resets its attempt counter on
//! every successful connection.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first retry.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor.
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// 500ms doubling up to 5s.
    fn default() -> Self {
        Self {
            first: Duration::from_millis(500),
            max: Duration::from_secs(5),
            factor: 2.0,
        }
    }
}

impl BackoffPolicy {
    /// Delay for the given attempt number (0-indexed).
    pub fn next(&self, attempt: u32) -> Duration {
        let max_secs = self.max.as_secs_f64();
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_zero_returns_first() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next(0), Duration::from_millis(500));
    }

    #[test]
    fn test_doubles_until_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.next(1), Duration::from_secs(1));
        assert_eq!(policy.next(2), Duration::from_secs(2));
        assert_eq!(policy.next(3), Duration::from_secs(4));
        assert_eq!(policy.next(4), Duration::from_secs(5));
        assert_eq!(policy.next(50), Duration::from_secs(5));
    }

    #[test]
    fn test_overflow_clamps_to_max() {
        let policy = BackoffPolicy {
            first: Duration::from_millis(100),
            max: Duration::from_secs(10),
            factor: 2.0,
        };
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(10));
    }
}
