//! Retry policy and backoff calculation for failed jobs.
//!
//! A failed job is re-scheduled with a delay computed from the queue's
//! [`RetryStrategy`] until its attempt count reaches the policy's
//! `max_attempts`, at which point it moves to the terminal failed state.
//!
//! The default policy retries 3 times with exponential backoff starting at
//! 2000ms and doubling per attempt (2000ms, 4000ms).
//!
//! # Examples
//!
//! ```rust
//! use trunkline::retry::{RetryPolicy, RetryStrategy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::default();
//! assert_eq!(policy.max_attempts, 3);
//! assert_eq!(policy.delay_for(1), Duration::from_millis(2000));
//! assert_eq!(policy.delay_for(2), Duration::from_millis(4000));
//! ```

use rand::Rng;
use std::time::Duration;

/// Types of jitter that can be applied to retry delays.
///
/// Jitter spreads out redeliveries so that a burst of failures does not
/// produce a burst of simultaneous retries against the same downstream.
#[derive(Debug, Clone, PartialEq)]
pub enum JitterType {
    /// Add or subtract a random duration between 0 and the specified value.
    Additive(Duration),

    /// Multiply the delay by a random factor in `1 ± f`.
    ///
    /// With factor 0.1 the delay lands between 90% and 110% of the original.
    Multiplicative(f64),
}

impl JitterType {
    /// Apply jitter to a delay. The result is never negative.
    pub fn apply(&self, delay: Duration) -> Duration {
        let mut rng = rand::thread_rng();

        match self {
            JitterType::Additive(jitter_amount) => {
                let jitter_millis = rng.gen_range(0..=jitter_amount.as_millis() as u64);
                let jitter = Duration::from_millis(jitter_millis);

                if rng.gen_bool(0.5) {
                    delay + jitter
                } else {
                    delay.saturating_sub(jitter)
                }
            }
            JitterType::Multiplicative(factor) => {
                let jitter_factor = rng.gen_range((1.0 - factor)..=(1.0 + factor));
                let jittered_millis = (delay.as_millis() as f64 * jitter_factor) as u64;
                Duration::from_millis(jittered_millis)
            }
        }
    }
}

/// Strategy for computing the delay before a failed job's next attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum RetryStrategy {
    /// Fixed delay between all retry attempts.
    Fixed(Duration),

    /// Exponential backoff: `base * multiplier^(attempt - 1)`.
    ///
    /// The default queue strategy. With base 2000ms and multiplier 2.0 the
    /// delays run 2000ms, 4000ms, 8000ms and so on, optionally capped at
    /// `max_delay` and spread by `jitter`.
    Exponential {
        /// Delay after the first failed attempt
        base: Duration,
        /// Growth factor per attempt (typically 2.0)
        multiplier: f64,
        /// Optional cap on the computed delay
        max_delay: Option<Duration>,
        /// Optional jitter applied after capping
        jitter: Option<JitterType>,
    },
}

impl RetryStrategy {
    /// Calculate the delay before the next retry.
    ///
    /// `attempt` is 1-based: pass the number of attempts already made, so
    /// the delay after the first failure is `calculate_delay(1)`.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let base_delay = match self {
            RetryStrategy::Fixed(delay) => *delay,

            RetryStrategy::Exponential {
                base,
                multiplier,
                max_delay,
                jitter,
            } => {
                let delay_multiplier = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay = base.mul_f64(delay_multiplier);

                let capped_delay = if let Some(max) = max_delay {
                    delay.min(*max)
                } else {
                    delay
                };

                if let Some(jitter_type) = jitter {
                    return jitter_type.apply(capped_delay);
                }

                capped_delay
            }
        };

        // Never schedule a zero delay
        base_delay.max(Duration::from_millis(1))
    }

    /// Create a fixed delay retry strategy.
    pub fn fixed(delay: Duration) -> Self {
        RetryStrategy::Fixed(delay)
    }

    /// Create an exponential backoff retry strategy without jitter.
    pub fn exponential(base: Duration, multiplier: f64, max_delay: Option<Duration>) -> Self {
        RetryStrategy::Exponential {
            base,
            multiplier,
            max_delay,
            jitter: None,
        }
    }

    /// Create an exponential backoff retry strategy with jitter.
    pub fn exponential_with_jitter(
        base: Duration,
        multiplier: f64,
        max_delay: Option<Duration>,
        jitter: JitterType,
    ) -> Self {
        RetryStrategy::Exponential {
            base,
            multiplier,
            max_delay,
            jitter: Some(jitter),
        }
    }
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::exponential(Duration::from_millis(2000), 2.0, None)
    }
}

/// Retry policy applied by the queue when a job fails.
///
/// Combines the attempt cap with the backoff strategy. A job whose attempt
/// count has reached `max_attempts` when it fails is moved to the terminal
/// failed state instead of being re-scheduled.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of handler invocations before a job is terminally failed
    pub max_attempts: u32,
    /// Backoff strategy for re-scheduling
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, strategy: RetryStrategy) -> Self {
        Self {
            max_attempts,
            strategy,
        }
    }

    /// Delay before redelivery after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.strategy.calculate_delay(attempt)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            strategy: RetryStrategy::default(),
        }
    }
}
