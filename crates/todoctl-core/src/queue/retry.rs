//! Retry policy: decides backoff delays.

use rand::Rng;
use std::time::Duration;

/// Per-key exponential backoff for failed reconciliations.
///
/// The cap bounds the delay, never the number of attempts: a key that keeps
/// failing is retried every `max_delay` for as long as it exists.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failure.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_delay: Duration,

    /// Extra random delay as a fraction of the computed delay (0.0 = none).
    pub jitter: f64,
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, multiplier: f64, max_delay: Duration) -> Self {
        Self {
            base_delay,
            multiplier,
            max_delay,
            jitter: 0.0,
        }
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay for the next retry based on attempt number.
    ///
    /// `attempts` is 1-indexed: the first failure passes 1.
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
    ///
    /// Example with base_delay=5ms, multiplier=2.0:
    /// - attempt 1: 5ms
    /// - attempt 2: 10ms
    /// - attempt 3: 20ms
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = attempts.saturating_sub(1).min(i32::MAX as u32) as i32;
        let raw = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max = self.max_delay.as_secs_f64();

        let mut secs = if raw.is_finite() { raw.min(max) } else { max };
        if self.jitter > 0.0 {
            secs += secs * rand::thread_rng().gen_range(0.0..=self.jitter);
            secs = secs.min(max);
        }
        Duration::try_from_secs_f64(secs.max(0.0)).unwrap_or(self.max_delay)
    }
}

impl Default for RetryPolicy {
    /// 5ms base, doubling, capped at 1000s.
    fn default() -> Self {
        Self::new(Duration::from_millis(5), 2.0, Duration::from_secs(1000))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_has_reasonable_values() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.base_delay, Duration::from_millis(5));
        assert_eq!(policy.multiplier, 2.0);
        assert_eq!(policy.max_delay, Duration::from_secs(1000));
        assert_eq!(policy.jitter, 0.0);
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::new(Duration::from_secs(2), 2.0, Duration::from_secs(60));

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert!(d2 > d1);
        assert!(d3 > d2);
        assert_eq!(d1, Duration::from_secs(2));
        assert_eq!(d2, Duration::from_secs(4));
        assert_eq!(d3, Duration::from_secs(8));
    }

    #[test]
    fn delay_is_capped() {
        let policy = RetryPolicy::new(Duration::from_secs(2), 2.0, Duration::from_secs(60));
        assert_eq!(policy.next_delay(10), Duration::from_secs(60));
        assert_eq!(policy.next_delay(u32::MAX), Duration::from_secs(60));
    }

    #[test]
    fn unrepresentable_cap_falls_back_to_max_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 2.0, Duration::MAX);
        assert_eq!(policy.next_delay(u32::MAX), Duration::MAX);
        assert_eq!(policy.next_delay(1), Duration::from_secs(1));
    }

    #[test]
    fn zero_attempts_uses_base_delay() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 3.0, Duration::from_secs(60));
        assert_eq!(policy.next_delay(0), Duration::from_secs(1));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(Duration::from_secs(1), 2.0, Duration::from_secs(10))
            .with_jitter(0.5);
        for _ in 0..100 {
            let d = policy.next_delay(2);
            assert!(d >= Duration::from_secs(2));
            assert!(d <= Duration::from_secs(3));
        }
        assert_eq!(policy.next_delay(20), Duration::from_secs(10));
    }
}
