//! Retry policy for transient ARM failures.
//!
//! ARM throttles with 429 and occasionally answers 5xx while a region is
//! busy. The HTTP client retries both, honoring `Retry-After` when the
//! service sends it and falling back to this policy otherwise.
//!
//! # Example
//!
//! ```rust,ignore
//! use azrm::retry::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(60));
//! assert!(policy.should_continue(0));
//! ```

use rand::Rng;
use std::time::Duration;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Same delay every time.
    Constant,
    /// `initial_delay * 2^attempt`.
    Exponential,
}

impl Backoff {
    fn delay(&self, attempt: u32, initial: Duration) -> Duration {
        match self {
            Self::Constant => initial,
            Self::Exponential => initial.saturating_mul(2u32.saturating_pow(attempt.min(16))),
        }
    }
}

/// Retry policy configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (0 means only the initial attempt).
    pub max_retries: u32,

    /// Delay before the first retry.
    pub initial_delay: Duration,

    /// Caps both backoff growth and server `Retry-After` hints.
    pub max_delay: Duration,

    pub backoff: Backoff,

    /// Spread each delay over its upper half, so concurrent state runs
    /// throttled together do not retry in lockstep.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::exponential(3, Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl RetryPolicy {
    /// Create a policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Fixed delay, no jitter.
    pub fn constant(max_retries: u32, delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay: delay,
            max_delay: delay,
            backoff: Backoff::Constant,
            jitter: false,
        }
    }

    /// Doubling delay with jitter.
    pub fn exponential(max_retries: u32, initial_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            max_delay,
            backoff: Backoff::Exponential,
            jitter: true,
        }
    }

    /// Delay after the given (0-indexed) failed attempt.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.backoff.delay(attempt, self.initial_delay).min(self.max_delay);
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let half = delay / 2;
        let spread = rand::thread_rng().gen_range(0..=half.as_millis() as u64);
        half + Duration::from_millis(spread)
    }

    /// Delay before the next attempt, preferring the server's `Retry-After`.
    pub fn delay_with_hint(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => hint.min(self.max_delay),
            None => self.delay_for_attempt(attempt),
        }
    }

    pub fn should_continue(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Status codes worth retrying.
pub fn is_retryable_status(status: u16) -> bool {
    status == 408 || status == 429 || ((500..600).contains(&status) && status != 501)
}

/// Parse a `Retry-After` header given in seconds.
pub fn parse_retry_after(value: Option<&str>) -> Option<Duration> {
    value
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_doubles() {
        let initial = Duration::from_millis(100);
        assert_eq!(Backoff::Exponential.delay(0, initial), Duration::from_millis(100));
        assert_eq!(Backoff::Exponential.delay(1, initial), Duration::from_millis(200));
        assert_eq!(Backoff::Exponential.delay(3, initial), Duration::from_millis(800));
        assert_eq!(Backoff::Constant.delay(3, initial), initial);
    }

    #[test]
    fn test_jitter_stays_in_upper_half() {
        let policy = RetryPolicy::exponential(5, Duration::from_secs(1), Duration::from_secs(1));
        for _ in 0..100 {
            let delay = policy.delay_for_attempt(2);
            assert!(delay >= Duration::from_millis(500));
            assert!(delay <= Duration::from_secs(1));
        }
    }

    #[test]
    fn test_max_delay_caps_growth() {
        let policy = RetryPolicy {
            jitter: false,
            ..RetryPolicy::exponential(10, Duration::from_secs(1), Duration::from_secs(5))
        };
        assert_eq!(policy.delay_for_attempt(8), Duration::from_secs(5));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = RetryPolicy::constant(3, Duration::from_secs(2));
        assert_eq!(
            policy.delay_with_hint(0, Some(Duration::from_secs(30))),
            Duration::from_secs(2)
        );
        assert_eq!(policy.delay_with_hint(0, None), Duration::from_secs(2));
    }

    #[test]
    fn test_should_continue() {
        let policy = RetryPolicy::constant(2, Duration::ZERO);
        assert!(policy.should_continue(0));
        assert!(policy.should_continue(1));
        assert!(!policy.should_continue(2));
        assert!(!RetryPolicy::no_retry().should_continue(0));
    }

    #[test]
    fn test_retryable_status() {
        assert!(is_retryable_status(429));
        assert!(is_retryable_status(503));
        assert!(!is_retryable_status(501));
        assert!(!is_retryable_status(404));
        assert!(!is_retryable_status(409));
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after(Some("7")), Some(Duration::from_secs(7)));
        assert_eq!(parse_retry_after(Some("soon")), None);
        assert_eq!(parse_retry_after(None), None);
    }
}
