// SPDX-License-Identifier: MIT
//! Classified exponential backoff for external calls.
//!
//! [`RetryPolicy::execute`] retries a fallible async operation with delays
//! derived from the error's [`ErrorClass`]:
//!
//! - connectivity / unknown: `base_delay * 2^(attempt-1)`
//! - authorization: `2 * base_delay * 2^(attempt-1)` — credential-propagation
//!   races resolve on the identity provider's schedule, not the network's
//! - validation: no retry; the same payload fails identically every time
//!
//! # Example
//! ```rust,ignore
//! use adbridge::retry::RetryPolicy;
//!
//! let result = RetryPolicy::default()
//!     .execute(|| async { api.send(&payload).await })
//!     .await;
//! ```

use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ErrorClass, PipelineError};

/// Retry configuration. All delays are wall-clock sleeps between attempts;
/// the policy bounds attempt counts, not total elapsed time.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first try).
    ///
    /// Default: 3
    pub max_attempts: u32,
    /// Delay before the second attempt for connectivity-class errors.
    ///
    /// Default: 500 ms
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    ///
    /// Default: 30 s
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Create a policy suitable for quick unit tests (no real waiting).
    pub fn instant() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
        }
    }

    /// Create a policy with a single attempt (no retries).
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay before the attempt following `attempt` (1-based), given the
    /// class of the error that attempt produced.
    ///
    /// Exposed so the schedule itself is testable without sleeping.
    pub fn backoff_delay(&self, class: ErrorClass, attempt: u32) -> Duration {
        let base = match class {
            ErrorClass::Authorization => self.base_delay * 2,
            _ => self.base_delay,
        };
        let exp = 2u32.saturating_pow(attempt.saturating_sub(1));
        base.saturating_mul(exp).min(self.max_delay)
    }

    /// Run `f` up to `max_attempts` times, sleeping the classified backoff
    /// delay between attempts.
    ///
    /// Validation-class errors abort immediately without further attempts.
    /// After exhaustion the last error is returned to the caller, which
    /// decides whether to surface it or degrade gracefully.
    ///
    /// # Panics
    /// Panics if `max_attempts` is 0 (would never attempt the operation).
    pub async fn execute<F, Fut, T>(&self, mut f: F) -> Result<T, PipelineError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PipelineError>>,
    {
        assert!(
            self.max_attempts > 0,
            "RetryPolicy.max_attempts must be at least 1"
        );

        let mut last_err: Option<PipelineError> = None;

        for attempt in 1..=self.max_attempts {
            match f().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "retry succeeded");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let class = e.class();
                    if class == ErrorClass::Validation {
                        warn!(err = %e, "validation error — not retrying");
                        return Err(e);
                    }
                    if attempt < self.max_attempts {
                        let delay = self.backoff_delay(class, attempt);
                        warn!(
                            attempt,
                            max = self.max_attempts,
                            class = ?class,
                            delay_ms = delay.as_millis(),
                            err = %e,
                            "attempt failed — retrying"
                        );
                        tokio::time::sleep(delay).await;
                    } else {
                        warn!(
                            attempt,
                            max = self.max_attempts,
                            class = ?class,
                            err = %e,
                            "all retry attempts exhausted"
                        );
                    }
                    last_err = Some(e);
                }
            }
        }

        // The loop always assigns last_err when all attempts fail.
        Err(last_err.expect("retry loop ended without setting last_err"))
    }
}
