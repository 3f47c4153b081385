//! Retry policy configuration for tasks.
//!
//! A policy bounds the number of attempts, spaces them with a back-off and
//! decides which attempt errors are worth retrying.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::{FlowError, Result};

/// Delay between attempts as a function of the attempt that just failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Backoff {
    /// Same delay every time
    Fixed(Duration),
    /// `base * attempt`, capped at `max`
    Linear { base: Duration, max: Duration },
    /// `base * multiplier^(attempt - 1)`, capped at `max`
    Exponential {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
    /// Exponential with ±10% jitter
    ExponentialJitter {
        base: Duration,
        multiplier: f64,
        max: Duration,
    },
}

impl Backoff {
    /// Delay to wait after `attempt` (1-based) failed.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Backoff::Fixed(delay) => *delay,
            Backoff::Linear { base, max } => base.saturating_mul(attempt).min(*max),
            Backoff::Exponential {
                base,
                multiplier,
                max,
            } => exponential(*base, *multiplier, attempt, *max),
            Backoff::ExponentialJitter {
                base,
                multiplier,
                max,
            } => {
                let delay = exponential(*base, *multiplier, attempt, *max);
                let jitter = fastrand::f64() * 0.2 - 0.1;
                let jittered = delay.as_nanos() as f64 * (1.0 + jitter);
                Duration::from_nanos(jittered.max(0.0) as u64).min(*max)
            }
        }
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Backoff::Fixed(Duration::ZERO)
    }
}

fn exponential(base: Duration, multiplier: f64, attempt: u32, max: Duration) -> Duration {
    let factor = multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
    let nanos = base.as_nanos() as f64 * factor;
    if !nanos.is_finite() || nanos >= max.as_nanos() as f64 {
        return max;
    }
    Duration::from_nanos(nanos as u64)
}

/// Which attempt errors should be retried.
#[derive(Clone, Default)]
pub enum RetryOn {
    /// Retry on any execution error or timeout
    #[default]
    Any,
    /// Retry only when the attempt timed out
    TimeoutsOnly,
    /// Never retry, regardless of max_attempts
    Never,
    /// Retry when the predicate returns true
    Predicate(Arc<dyn Fn(&FlowError) -> bool + Send + Sync>),
}

impl RetryOn {
    pub fn matches(&self, error: &FlowError) -> bool {
        match self {
            RetryOn::Any => true,
            RetryOn::TimeoutsOnly => matches!(error, FlowError::Timeout { .. }),
            RetryOn::Never => false,
            RetryOn::Predicate(predicate) => predicate(error),
        }
    }
}

impl fmt::Debug for RetryOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryOn::Any => f.write_str("Any"),
            RetryOn::TimeoutsOnly => f.write_str("TimeoutsOnly"),
            RetryOn::Never => f.write_str("Never"),
            RetryOn::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

/// Retry policy for a task.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one. Always >= 1.
    pub max_attempts: u32,
    /// Delay between attempts
    pub backoff: Backoff,
    /// Condition for when to retry
    pub retry_on: RetryOn,
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::default(),
            retry_on: RetryOn::Any,
        }
    }

    /// Up to `max_attempts` attempts with a fixed delay between them.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Fixed(delay),
            retry_on: RetryOn::Any,
        }
    }

    /// Up to `max_attempts` attempts, doubling the delay from `base` up to one minute.
    pub fn exponential(max_attempts: u32, base: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential {
                base,
                multiplier: 2.0,
                max: Duration::from_secs(60),
            },
            retry_on: RetryOn::Any,
        }
    }

    /// Builder: set the back-off.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Builder: set the retry condition.
    pub fn with_condition(mut self, condition: RetryOn) -> Self {
        self.retry_on = condition;
        self
    }

    /// Builder: retry only when `predicate` accepts the attempt error.
    pub fn retry_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&FlowError) -> bool + Send + Sync + 'static,
    {
        self.with_condition(RetryOn::Predicate(Arc::new(predicate)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(FlowError::configuration(
                "max_attempts must be at least 1",
            ));
        }
        Ok(())
    }

    /// Check if retries are enabled.
    pub fn is_enabled(&self) -> bool {
        self.max_attempts > 1 && !matches!(self.retry_on, RetryOn::Never)
    }

    /// Whether another attempt should follow the failed `attempt` (1-based).
    pub fn should_retry(&self, attempt: u32, error: &FlowError) -> bool {
        error.is_retryable() && attempt < self.max_attempts && self.retry_on.matches(error)
    }

    /// Delay before the attempt following `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.backoff.delay_for(attempt)
    }
}

impl Default for RetryPolicy {
    /// Default policy: no retries.
    fn default() -> Self {
        Self::none()
    }
}
