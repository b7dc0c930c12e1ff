//! Retry logic with exponential backoff for transient provider errors.

use crate::context::CancelToken;
use crate::error::ProviderError;
use std::time::Duration;

/// Configuration for retrying transient failures.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(2),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped.max(0.0))
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Outcome of a retried operation
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, ProviderError>,
    /// Number of times the operation ran
    pub attempts: u32,
}

/// Execute an operation with retry logic.
///
/// Transient errors are retried with exponential backoff until
/// `max_attempts` is reached. Backoff sleeps are cut short by cancellation,
/// in which case the result is `ProviderError::Cancelled`. `on_retry` is
/// called with the failed attempt number and the delay before the next one.
pub fn with_retry<T, F, R>(
    config: &RetryConfig,
    cancel: &CancelToken,
    mut on_retry: R,
    mut operation: F,
) -> Attempted<T>
where
    F: FnMut(u32) -> Result<T, ProviderError>,
    R: FnMut(u32, &ProviderError, Duration),
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation(attempt) {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                };
            }
            Err(e) => {
                if !e.is_retryable() || attempt >= max_attempts {
                    return Attempted {
                        result: Err(e),
                        attempts: attempt,
                    };
                }

                let delay = config.delay_for_attempt(attempt - 1);
                on_retry(attempt, &e, delay);

                if !cancel.sleep(delay) {
                    return Attempted {
                        result: Err(ProviderError::Cancelled),
                        attempts: attempt,
                    };
                }
            }
        }
    }
}
