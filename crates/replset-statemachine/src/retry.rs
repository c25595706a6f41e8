//! Bounded retry of transient failures

use std::future::Future;
use std::time::Duration;

/// Number of attempts and fixed delay between them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    #[inline]
    #[must_use]
    pub const fn new(attempts: u32, backoff: Duration) -> Self {
        Self { attempts, backoff }
    }

    /// Single attempt, no delay
    #[inline]
    #[must_use]
    pub const fn none() -> Self {
        Self::new(1, Duration::ZERO)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}

/// Run `op` until it succeeds, fails permanently or attempts run out
///
/// # Errors
/// The last error when it is not transient or no attempts remain
pub async fn retry<T, E, F, Fut>(
    policy: RetryPolicy,
    is_transient: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < attempts && is_transient(&e) => {
                tracing::debug!(attempt, attempts, "transient failure, retrying");
                attempt += 1;
                if !policy.backoff.is_zero() {
                    tokio::time::sleep(policy.backoff).await;
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<u32, &str> = retry(RetryPolicy::new(3, Duration::ZERO), |_| true, move || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n < 3 { Err("conflict") } else { Ok(n) }
        })
        .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), &str> = retry(RetryPolicy::new(3, Duration::ZERO), |_| true, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("conflict")
        })
        .await;
        assert_eq!(result, Err("conflict"));
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), &str> = retry(RetryPolicy::default(), |e| *e == "conflict", move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("gone")
        })
        .await;
        assert_eq!(result, Err("gone"));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_fixed_backoff_between_attempts() {
        let start = tokio::time::Instant::now();
        let _: Result<(), &str> =
            retry(RetryPolicy::default(), |_| true, || async { Err("conflict") }).await;
        assert_eq!(start.elapsed(), Duration::from_secs(2));
    }
}
