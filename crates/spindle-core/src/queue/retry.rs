//! Retry policy: decides retry eligibility and backoff delays.

use std::time::Duration;

use rand::Rng;

use crate::domain::Task;

/// Randomization applied on top of the computed backoff.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Jitter {
    /// Exact backoff delay.
    #[default]
    None,
    /// Uniform in `[0, delay]`.
    Full,
    /// `delay / 2 + uniform[0, delay / 2]`.
    Equal,
}

impl Jitter {
    fn apply(self, delay: Duration) -> Duration {
        let ms = delay.as_millis() as u64;
        if ms == 0 {
            return delay;
        }
        let mut rng = rand::thread_rng();
        match self {
            Jitter::None => delay,
            Jitter::Full => Duration::from_millis(rng.gen_range(0..=ms)),
            Jitter::Equal => {
                let half = ms / 2;
                Duration::from_millis(half + rng.gen_range(0..=ms - half))
            }
        }
    }
}

/// Retry policy for failed tasks (also drives reconnect backoff of the event bus).
///
/// `delay(attempt) = min(base_delay * multiplier^attempt, max_delay)`, then jitter.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Delay for attempt 0.
    pub base_delay: Duration,

    /// Upper bound for any delay.
    pub max_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    /// 1s base doubling up to 5 minutes, no jitter.
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: Jitter::None,
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            base_delay,
            max_delay,
            ..Self::default()
        }
    }

    pub fn with_jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    /// Backoff before the next try, given how many retries were consumed.
    ///
    /// Example with base=1s, max=10s:
    /// - attempt 0: 1s
    /// - attempt 1: 2s
    /// - attempt 3: 8s
    /// - attempt 4 and later: 10s
    pub fn delay(&self, attempt: u32) -> Duration {
        let exp = attempt.min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        let max_secs = self.max_delay.as_secs_f64();

        let base = if !secs.is_finite() || secs < 0.0 || secs > max_secs {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        };
        self.jitter.apply(base)
    }

    /// A failed task may run again while it still has retries left.
    pub fn should_retry(&self, task: &Task) -> bool {
        task.retry_count() < task.max_retries()
    }
}
