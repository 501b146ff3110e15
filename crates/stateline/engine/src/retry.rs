//! Retry/Catch policy engine
//!
//! Policies are consulted in declaration order and the first matcher
//! wins; later entries are never considered for an error the first one
//! matched, even when its attempts are exhausted. Attempt counters are
//! scoped to one state invocation: re-entering a state through a Catch
//! loop starts the counters over.

use rand::Rng;
use stateline_types::{Catcher, JitterStrategy, Retrier, StateError};
use std::time::Duration;

/// Outcome of consulting the retry policy for one failure.
#[derive(Clone, Debug, PartialEq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then run the attempt again.
    Retry {
        retrier_index: usize,
        attempt: u32,
        delay: Duration,
    },
    /// No retrier matches (`matched_retrier` is None), or the matching
    /// retrier is out of attempts. A retrier with MaxAttempts 0 lands
    /// here on the first failure with its index reported, so the caller
    /// can still mark the attempt boundary before consulting Catch.
    Exhausted { matched_retrier: Option<usize> },
}

/// Per-invocation retry attempt counters.
#[derive(Clone, Debug)]
pub struct RetryTracker {
    attempts: Vec<u32>,
}

impl RetryTracker {
    pub fn new(retrier_count: usize) -> Self {
        Self {
            attempts: vec![0; retrier_count],
        }
    }

    /// Consult the policy for `error`. On a retry decision the matched
    /// retrier's counter is already incremented.
    pub fn next_attempt(&mut self, retriers: &[Retrier], error: &StateError) -> RetryDecision {
        let Some(index) = retriers
            .iter()
            .position(|r| r.error_equals.iter().any(|m| error.matched_by(m)))
        else {
            return RetryDecision::Exhausted {
                matched_retrier: None,
            };
        };

        let retrier = &retriers[index];
        if self.attempts[index] >= retrier.max_attempts() {
            // MaxAttempts: 0 lands here on the first failure, falling
            // straight through to Catch.
            return RetryDecision::Exhausted {
                matched_retrier: Some(index),
            };
        }
        self.attempts[index] += 1;
        let attempt = self.attempts[index];
        RetryDecision::Retry {
            retrier_index: index,
            attempt,
            delay: compute_delay(retrier, attempt),
        }
    }

    pub fn attempts_for(&self, retrier_index: usize) -> u32 {
        self.attempts[retrier_index]
    }
}

/// Delay before attempt `attempt` (1-based):
/// `IntervalSeconds * BackoffRate^(attempt-1)`, capped at
/// `MaxDelaySeconds`, then jittered.
pub fn compute_delay(retrier: &Retrier, attempt: u32) -> Duration {
    let base = retrier.interval_seconds() as f64;
    let mut seconds = base * retrier.backoff_rate().powi(attempt.saturating_sub(1) as i32);
    if let Some(cap) = retrier.max_delay_seconds {
        seconds = seconds.min(cap as f64);
    }
    let seconds = match retrier.jitter_strategy() {
        JitterStrategy::None => seconds,
        JitterStrategy::Full => {
            if seconds > 0.0 {
                rand::thread_rng().gen_range(0.0..=seconds)
            } else {
                0.0
            }
        }
    };
    Duration::from_secs_f64(seconds)
}

/// First catcher whose matchers select `error`.
pub fn select_catcher<'a>(catchers: &'a [Catcher], error: &StateError) -> Option<&'a Catcher> {
    catchers
        .iter()
        .find(|c| c.error_equals.iter().any(|m| error.matched_by(m)))
}
