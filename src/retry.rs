//! Retry policies for blocking connection phases.
//!
//! Both network association and broker reconnect are "try, wait, try
//! again" loops. The policy decides how long to wait after each failure
//! and whether to give up at all; the [`Clock`] performs the wait so the
//! loops run instantly under a simulated clock.

use crate::clock::Clock;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How long to wait between attempts, and how many attempts to make.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RetryPolicy {
    /// Constant delay between attempts.
    Fixed {
        /// Delay after every failed attempt, in milliseconds.
        delay_ms: u64,
        /// Give up after this many attempts (`None` retries forever).
        #[serde(default)]
        max_attempts: Option<u32>,
    },
    /// Delay doubles after every failure, up to a ceiling.
    Exponential {
        /// Delay after the first failure, in milliseconds.
        initial_delay_ms: u64,
        /// Upper bound on any single delay, in milliseconds.
        max_delay_ms: u64,
        /// Give up after this many attempts (`None` retries forever).
        #[serde(default)]
        max_attempts: Option<u32>,
    },
}

impl RetryPolicy {
    /// Unbounded retries with a constant delay.
    pub fn fixed(delay: Duration) -> Self {
        Self::Fixed {
            delay_ms: delay.as_millis() as u64,
            max_attempts: None,
        }
    }

    /// Returns a copy of this policy capped at `attempts` tries.
    pub fn with_max_attempts(self, attempts: u32) -> Self {
        let cap = Some(attempts.max(1));
        match self {
            Self::Fixed { delay_ms, .. } => Self::Fixed {
                delay_ms,
                max_attempts: cap,
            },
            Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
                ..
            } => Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
                max_attempts: cap,
            },
        }
    }

    /// Maximum number of attempts, if bounded.
    pub fn max_attempts(&self) -> Option<u32> {
        match self {
            Self::Fixed { max_attempts, .. } | Self::Exponential { max_attempts, .. } => {
                *max_attempts
            }
        }
    }

    /// Delay to wait after `failures` consecutive failed attempts.
    ///
    /// Returns `None` once the attempt budget is spent.
    pub fn delay_after(&self, failures: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts() {
            if failures >= max {
                return None;
            }
        }

        let ms = match *self {
            Self::Fixed { delay_ms, .. } => delay_ms,
            Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
                ..
            } => {
                let shift = failures.saturating_sub(1).min(63);
                initial_delay_ms
                    .checked_mul(1u64 << shift)
                    .unwrap_or(u64::MAX)
                    .min(max_delay_ms)
            }
        };
        Some(Duration::from_millis(ms))
    }

    /// Validates the policy parameters.
    pub fn validate(&self) -> Result<(), &'static str> {
        match *self {
            Self::Fixed { max_attempts, .. } if max_attempts == Some(0) => {
                Err("max_attempts must be at least 1")
            }
            Self::Exponential {
                initial_delay_ms,
                max_delay_ms,
                max_attempts,
            } => {
                if max_attempts == Some(0) {
                    Err("max_attempts must be at least 1")
                } else if initial_delay_ms == 0 || max_delay_ms < initial_delay_ms {
                    Err("exponential delays must satisfy 0 < initial <= max")
                } else {
                    Ok(())
                }
            }
            _ => Ok(()),
        }
    }
}

/// Returned when a bounded policy runs out of attempts.
#[derive(Debug)]
pub struct RetryExhausted<E> {
    /// Attempts made, including the last one.
    pub attempts: u32,
    /// Error from the last attempt.
    pub last_error: E,
}

/// Runs `attempt` until it succeeds or the policy gives up.
///
/// `attempt` receives the 1-based attempt number. `on_failure` is called
/// with the attempt number, its error and the upcoming delay before each
/// wait; it is not called for the final, abandoned attempt.
pub fn retry<K, T, E>(
    policy: &RetryPolicy,
    clock: &K,
    mut attempt: impl FnMut(u32) -> Result<T, E>,
    mut on_failure: impl FnMut(u32, &E, Duration),
) -> Result<T, RetryExhausted<E>>
where
    K: Clock + ?Sized,
{
    let mut n = 1u32;
    loop {
        match attempt(n) {
            Ok(value) => return Ok(value),
            Err(e) => match policy.delay_after(n) {
                Some(delay) => {
                    on_failure(n, &e, delay);
                    clock.sleep(delay);
                }
                None => {
                    return Err(RetryExhausted {
                        attempts: n,
                        last_error: e,
                    })
                }
            },
        }
        n = n.saturating_add(1);
    }
}
