//! Retry policy: decides backoff delays and when to give up.

use std::time::Duration;

use rand::Rng;

/// Retry policy for failed deliveries.
///
/// Exponential backoff, capped, plus a random jitter so that a burst of events
/// failing together does not come back as a burst.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Delay after the first failed attempt.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound on the (pre-jitter) delay.
    pub max_delay: Duration,

    /// Extra random delay, as a fraction of the computed delay (0.0..=1.0).
    pub jitter: f64,

    /// Attempts allowed before the event is Exhausted.
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    /// 2s, 4s, 8s, ... capped at 10 minutes, +0..10% jitter, 5 attempts.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(600),
            jitter: 0.1,
            max_attempts: 5,
        }
    }
}

impl RetryPolicy {
    /// Deterministic delay before the next attempt.
    ///
    /// `attempts` is the number of attempts already made (1-indexed):
    /// delay = min(base_delay * multiplier^(attempts - 1), max_delay)
    ///
    /// Example with the defaults:
    /// - attempt 1 (first failure): 2s
    /// - attempt 2: 4s
    /// - attempt 3: 8s
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let exponent = i32::try_from(attempts.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let capped = delay_secs.min(self.max_delay.as_secs_f64());
        Duration::try_from_secs_f64(capped).unwrap_or(self.max_delay)
    }

    /// `next_delay` plus uniform jitter in `[0, jitter * delay]`.
    pub fn delay_with_jitter<R: Rng>(&self, attempts: u32, rng: &mut R) -> Duration {
        let delay = self.next_delay(attempts);
        if self.jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let factor = rng.gen_range(0.0..=self.jitter);
        delay + delay.mul_f64(factor)
    }

    /// Delay to use for the next retry, with thread-local randomness.
    pub fn backoff(&self, attempts: u32) -> Duration {
        self.delay_with_jitter(attempts, &mut rand::thread_rng())
    }

    /// No attempts left after `attempts` have been made?
    pub fn is_exhausted(&self, attempts: u32) -> bool {
        attempts >= self.max_attempts
    }
}
