//! Bounded retry for provider mutations.
//!
//! Some provider errors are transient: a freshly created instance profile is
//! not visible to the compute service for a few seconds, for example. Those
//! are recognized by message pattern and retried with a fixed delay, up to a
//! fixed number of attempts. Every other error fails immediately.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{ProviderErrors, ProviderResult, RenderError, Result};

/// Default number of attempts, including the first.
pub const DEFAULT_ATTEMPTS: u32 = 10;

/// Default delay between attempts in seconds.
pub const DEFAULT_DELAY_SECS: u64 = 10;

/// Default transient error pattern.
pub const DEFAULT_TRANSIENT_PATTERN: &str = "Invalid IAM Instance Profile name";

/// Classification of a provider error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying.
    Transient,
    /// Fails the operation immediately.
    Terminal,
}

/// Retry policy for provider mutations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
    transient_patterns: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_ATTEMPTS,
            delay: Duration::from_secs(DEFAULT_DELAY_SECS),
            transient_patterns: vec![DEFAULT_TRANSIENT_PATTERN.to_string()],
        }
    }
}

impl RetryPolicy {
    /// Creates a policy. An attempt count of zero is treated as one.
    #[must_use]
    pub fn new(max_attempts: u32, delay: Duration, transient_patterns: Vec<String>) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            transient_patterns,
        }
    }

    /// Sets the delay between attempts.
    #[must_use]
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Maximum number of attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Classifies a provider error.
    #[must_use]
    pub fn classify(&self, error: &ProviderErrors) -> ErrorClass {
        if self
            .transient_patterns
            .iter()
            .any(|p| error.contains_message(p))
        {
            ErrorClass::Transient
        } else {
            ErrorClass::Terminal
        }
    }

    /// Runs `operation` until it succeeds, fails terminally, or the attempt
    /// budget runs out.
    ///
    /// # Errors
    ///
    /// Returns the provider error on terminal failure, or
    /// [`RenderError::RetriesExhausted`] carrying the last error.
    pub async fn run<T, F, Fut>(&self, what: &str, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let error = match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if self.classify(&error) == ErrorClass::Terminal {
                return Err(error.into());
            }
            if attempt >= self.max_attempts {
                warn!("Giving up on {what} after {attempt} attempts: {error}");
                return Err(RenderError::RetriesExhausted {
                    attempts: attempt,
                    last: error,
                }
                .into());
            }

            debug!(
                "Transient failure on {what} (attempt {attempt}/{}): {error}",
                self.max_attempts
            );
            tokio::time::sleep(self.delay).await;
            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast() -> RetryPolicy {
        RetryPolicy::default().with_delay(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_transient_error_is_retried_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = fast()
            .run("create", move || async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProviderErrors::single("Invalid IAM Instance Profile name: nodes"))
                } else {
                    Ok(7)
                }
            })
            .await
            .unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_is_bounded() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fast()
            .run("create", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderErrors::single("Invalid IAM Instance Profile name"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), DEFAULT_ATTEMPTS);
        assert!(err.to_string().contains("Gave up after 10 attempts"));
    }

    #[tokio::test]
    async fn test_terminal_error_is_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let err = fast()
            .run("create", move || async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(ProviderErrors::coded("QUOTA", "limit exceeded"))
            })
            .await
            .unwrap_err();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(err.to_string().contains("QUOTA: limit exceeded"));
    }

    #[test]
    fn test_zero_attempts_means_one() {
        let policy = RetryPolicy::new(0, Duration::ZERO, Vec::new());
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(
            policy.classify(&ProviderErrors::single("Invalid IAM Instance Profile name")),
            ErrorClass::Terminal
        );
    }
}
