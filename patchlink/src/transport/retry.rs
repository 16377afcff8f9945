//! Backoff policies for reconnects and job retries.
//!
//! # Example
//!
//! ```
//! use patchlink::transport::RetryPolicy;
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::exponential(3).without_jitter();
//! assert_eq!(policy.delay_for_attempt(1), Some(Duration::from_millis(100)));
//! assert_eq!(policy.delay_for_attempt(3), None);
//! ```

use std::time::Duration;

use rand::Rng;

/// Default initial retry delay in milliseconds.
pub const DEFAULT_INITIAL_DELAY_MS: u64 = 100;

/// Default maximum retry delay in seconds.
pub const DEFAULT_MAX_DELAY_SECS: u64 = 30;

/// Default exponential backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// How an operation handles transient failures.
#[derive(Clone, Debug, PartialEq, Default)]
pub enum RetryPolicy {
    /// No retries - fail immediately on error.
    #[default]
    None,

    /// Fixed number of attempts with constant delay between them.
    Fixed {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay between attempts.
        delay: Duration,
    },

    /// Exponential backoff, optionally jittered.
    ///
    /// With jitter enabled the delay is drawn uniformly from the upper half
    /// of the computed backoff, so clients that lost the same server do not
    /// reconnect in lockstep.
    ExponentialBackoff {
        /// Maximum number of attempts (including the initial attempt).
        max_attempts: u32,
        /// Delay after the first failure.
        initial_delay: Duration,
        /// Delay cap.
        max_delay: Duration,
        /// Multiplier applied after each failure.
        multiplier: f64,
        /// Randomize each delay within `[delay/2, delay]`.
        jitter: bool,
    },
}

impl RetryPolicy {
    /// Jittered exponential backoff with the default delays.
    pub fn exponential(max_attempts: u32) -> Self {
        Self::ExponentialBackoff {
            max_attempts,
            initial_delay: Duration::from_millis(DEFAULT_INITIAL_DELAY_MS),
            max_delay: Duration::from_secs(DEFAULT_MAX_DELAY_SECS),
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: true,
        }
    }

    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self::Fixed {
            max_attempts,
            delay,
        }
    }

    /// Replaces the initial delay of an exponential policy.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        if let Self::ExponentialBackoff { initial_delay, .. } = &mut self {
            *initial_delay = delay;
        }
        self
    }

    /// Replaces the delay cap of an exponential policy.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        if let Self::ExponentialBackoff { max_delay, .. } = &mut self {
            *max_delay = delay;
        }
        self
    }

    /// Disables jitter, making delays deterministic.
    pub fn without_jitter(mut self) -> Self {
        if let Self::ExponentialBackoff { jitter, .. } = &mut self {
            *jitter = false;
        }
        self
    }

    /// Delay before the next attempt after `attempt` failures.
    ///
    /// `attempt` is 1-based: pass 1 after the initial attempt fails.
    /// Returns `None` once the attempt budget is spent.
    pub fn delay_for_attempt(&self, attempt: u32) -> Option<Duration> {
        match self {
            Self::None => None,
            Self::Fixed {
                max_attempts,
                delay,
            } => (attempt < *max_attempts).then_some(*delay),
            Self::ExponentialBackoff {
                max_attempts,
                initial_delay,
                max_delay,
                multiplier,
                jitter,
            } => {
                if attempt >= *max_attempts {
                    return None;
                }
                let factor = multiplier.powi(attempt.saturating_sub(1) as i32);
                let delay_ms = (initial_delay.as_millis() as f64 * factor)
                    .min(max_delay.as_millis() as f64) as u64;

                if *jitter && delay_ms > 1 {
                    let floor = delay_ms / 2;
                    let jittered = rand::rng().random_range(floor..=delay_ms);
                    Some(Duration::from_millis(jittered))
                } else {
                    Some(Duration::from_millis(delay_ms))
                }
            }
        }
    }

    /// Maximum number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        match self {
            Self::None => 1,
            Self::Fixed { max_attempts, .. } => *max_attempts,
            Self::ExponentialBackoff { max_attempts, .. } => *max_attempts,
        }
    }
}
