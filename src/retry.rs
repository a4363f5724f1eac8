//! Bounded exponential retry.
//!
//! [`RetryPolicy`] describes how many attempts an operation gets and how the delay between
//! them grows; `max_retries` counts attempts in total. [`retry_with_backoff`] applies a policy
//! to any async operation, while [`Backoff`] exposes the raw delay sequence for loops with
//! their own attempt rules (the RPC client's connection loop uses the same policy).

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Upper bound for a single backoff delay.
pub const MAX_BACKOFF_DELAY: Duration = Duration::from_secs(3600);

/// Retry budget and delay growth for an operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Zero is treated as one.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each retry. Values below `1.0` act as `1.0`.
    pub backoff_factor: f64,
}

impl RetryPolicy {
    /// Policy doubling the delay after every retry.
    pub const fn new(max_retries: u32, initial_delay: Duration) -> Self {
        Self {
            max_retries,
            initial_delay,
            backoff_factor: 2.0,
        }
    }

    /// Delay sequence starting at `initial_delay`.
    pub fn backoff(&self) -> Backoff {
        let factor = if self.backoff_factor.is_finite() {
            self.backoff_factor.max(1.0)
        } else {
            1.0
        };
        Backoff {
            next: self.initial_delay.min(MAX_BACKOFF_DELAY),
            factor,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(1))
    }
}

/// Infinite sequence of growing delays.
#[derive(Debug, Clone)]
pub struct Backoff {
    next: Duration,
    factor: f64,
}

impl Backoff {
    /// Return the current delay and advance to the next one.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.next;
        self.next = Duration::try_from_secs_f64(current.as_secs_f64() * self.factor)
            .unwrap_or(MAX_BACKOFF_DELAY)
            .min(MAX_BACKOFF_DELAY);
        current
    }
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_delay())
    }
}

/// Run `op` until it succeeds, retrying failures accepted by `should_retry`.
///
/// At most `policy.max_retries` attempts are made. Errors rejected by `should_retry` are
/// returned immediately; once the budget is spent the last error is returned unchanged.
pub async fn retry_with_backoff<T, E, F, Fut, P>(
    policy: &RetryPolicy,
    operation: &str,
    mut should_retry: P,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: FnMut(&E) -> bool,
    E: Display,
{
    let mut backoff = policy.backoff();
    let max_attempts = policy.max_retries.max(1);
    let mut attempt: u32 = 1;

    loop {
        if attempt > 1 {
            tracing::info!(
                operation,
                attempt,
                max_retries = policy.max_retries,
                "Retrying operation"
            );
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(error) if !should_retry(&error) => return Err(error),
            Err(error) if attempt >= max_attempts => {
                tracing::error!(operation, attempt, error = %error, "Final retry attempt failed");
                return Err(error);
            }
            Err(error) => {
                let delay = backoff.next_delay();
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Operation failed; retrying after backoff"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    #[test]
    fn backoff_doubles_by_default() {
        let delays: Vec<_> = RetryPolicy::new(3, Duration::from_secs(1))
            .backoff()
            .take(4)
            .collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(4),
                Duration::from_secs(8),
            ]
        );
    }

    #[test]
    fn backoff_is_capped() {
        let mut backoff = RetryPolicy::new(1, Duration::from_secs(3000)).backoff();
        assert_eq!(backoff.next_delay(), Duration::from_secs(3000));
        assert_eq!(backoff.next_delay(), MAX_BACKOFF_DELAY);
        assert_eq!(backoff.next_delay(), MAX_BACKOFF_DELAY);
    }

    #[test]
    fn custom_factor_is_applied_and_clamped() {
        let mut policy = RetryPolicy::new(2, Duration::from_millis(100));
        policy.backoff_factor = 3.0;
        let mut backoff = policy.backoff();
        assert_eq!(backoff.next_delay(), Duration::from_millis(100));
        assert_eq!(backoff.next_delay(), Duration::from_millis(300));

        policy.backoff_factor = 0.5;
        let mut flat = policy.backoff();
        assert_eq!(flat.next_delay(), Duration::from_millis(100));
        assert_eq!(flat.next_delay(), Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let policy = RetryPolicy::new(5, Duration::from_secs(1));

        let result: Result<&str, String> = retry_with_backoff(
            &policy,
            "flaky",
            |_| true,
            || {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("transient".to_string())
                    } else {
                        Ok("done")
                    }
                }
            },
        )
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_last_error_after_exhausting_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(2, Duration::from_secs(1));

        let result: Result<(), String> = retry_with_backoff(
            &policy,
            "always-failing",
            |_| true,
            || {
                let calls = calls.clone();
                async move {
                    let attempt = calls.fetch_add(1, Ordering::SeqCst);
                    Err(format!("failure {attempt}"))
                }
            },
        )
        .await;

        assert_eq!(result, Err("failure 1".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    async fn attempts_made(max_retries: u32) -> u32 {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::new(max_retries, Duration::from_millis(1));
        let _: Result<(), String> = retry_with_backoff(
            &policy,
            "always-failing",
            |_| true,
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("down".to_string())
                }
            },
        )
        .await;
        calls.load(Ordering::SeqCst)
    }

    #[tokio::test(start_paused = true)]
    async fn max_retries_counts_total_attempts() {
        assert_eq!(attempts_made(5).await, 5);
        assert_eq!(attempts_made(1).await, 1);
        assert_eq!(attempts_made(0).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn non_matching_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let started = Instant::now();
        let policy = RetryPolicy::new(4, Duration::from_secs(1));

        let result: Result<(), String> = retry_with_backoff(
            &policy,
            "logical",
            |error: &String| error.starts_with("transient"),
            || {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err("bad input".to_string())
                }
            },
        )
        .await;

        assert_eq!(result, Err("bad input".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
