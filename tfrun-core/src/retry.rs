//! Bounded retry with a fixed interval and cancellation-aware waits

use std::future::Future;
use std::time::Duration;

use log::warn;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// How many times to retry an action and how long to wait between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    /// Number of retries after the first attempt (0 = run exactly once)
    pub max_attempts: u32,
    /// Wait between two attempts
    pub interval: Duration,
}

impl RetryPolicy {
    /// Create a policy, clamping negative retry counts to zero
    pub fn new(retries: i64, interval: Duration) -> Self {
        Self {
            max_attempts: u32::try_from(retries.max(0)).unwrap_or(u32::MAX),
            interval,
        }
    }

    /// Run the action exactly once
    pub fn once() -> Self {
        Self::default()
    }

    /// Total number of attempts this policy allows
    pub fn total_attempts(&self) -> u64 {
        u64::from(self.max_attempts) + 1
    }
}

/// Run `action` until it succeeds, retrying up to `policy.max_attempts` times.
///
/// The last attempt always runs outside the retry loop and its error is
/// returned unchanged. If `cancel` fires while waiting between attempts, the
/// wait is abandoned and a [`crate::ErrorKind::Cancelled`] error wrapping the
/// last attempt's error is returned without running another attempt.
pub async fn retry<T, F, Fut>(
    cancel: &CancellationToken,
    policy: RetryPolicy,
    mut action: F,
) -> Result<T>
where
    F: FnMut(CancellationToken) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 1..=policy.max_attempts {
        let err = match action(cancel.clone()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        warn!(
            "attempt {}/{} failed: {}",
            attempt,
            policy.total_attempts(),
            err
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::cancelled(err)),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }

    action(cancel.clone()).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Instant;

    fn succeed_on_nth(
        n: u32,
        count: Arc<AtomicU32>,
    ) -> impl FnMut(CancellationToken) -> std::future::Ready<Result<()>> {
        move |_| {
            let current = count.fetch_add(1, Ordering::SeqCst) + 1;
            if current == n {
                std::future::ready(Ok(()))
            } else {
                std::future::ready(Err(Error::new(
                    ErrorKind::Transient,
                    format!("failed on try {}", current),
                )))
            }
        }
    }

    #[tokio::test]
    async fn test_success_on_first_try_without_retry() {
        let count = Arc::new(AtomicU32::new(0));
        let result = retry(
            &CancellationToken::new(),
            RetryPolicy::once(),
            succeed_on_nth(1, count.clone()),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_success_on_retry_stops_early() {
        let count = Arc::new(AtomicU32::new(0));
        let result = retry(
            &CancellationToken::new(),
            RetryPolicy::new(5, Duration::ZERO),
            succeed_on_nth(2, count.clone()),
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_fail_without_retry() {
        let count = Arc::new(AtomicU32::new(0));
        let result = retry(
            &CancellationToken::new(),
            RetryPolicy::once(),
            succeed_on_nth(2, count.clone()),
        )
        .await;
        let err = result.unwrap_err();
        assert_eq!(err.to_string(), "failed on try 1");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_always_failing_runs_retries_plus_one() {
        for n in 0..4 {
            let count = Arc::new(AtomicU32::new(0));
            let result = retry(
                &CancellationToken::new(),
                RetryPolicy::new(i64::from(n), Duration::ZERO),
                succeed_on_nth(u32::MAX, count.clone()),
            )
            .await;
            let err = result.unwrap_err();
            assert_eq!(count.load(Ordering::SeqCst), n + 1);
            assert_eq!(err.kind(), ErrorKind::Transient);
            assert_eq!(err.to_string(), format!("failed on try {}", n + 1));
        }
    }

    #[tokio::test]
    async fn test_negative_retries_clamped_to_single_attempt() {
        let policy = RetryPolicy::new(-3, Duration::from_secs(1));
        assert_eq!(policy.max_attempts, 0);

        let count = Arc::new(AtomicU32::new(0));
        let result = retry(
            &CancellationToken::new(),
            policy,
            succeed_on_nth(u32::MAX, count.clone()),
        )
        .await;
        assert!(result.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_waits_interval_between_attempts() {
        let count = Arc::new(AtomicU32::new(0));
        let start = tokio::time::Instant::now();
        let result = retry(
            &CancellationToken::new(),
            RetryPolicy::new(2, Duration::from_secs(30)),
            succeed_on_nth(3, count.clone()),
        )
        .await;
        assert!(result.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_wait() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let count = Arc::new(AtomicU32::new(0));
        let start = Instant::now();
        let result = retry(
            &cancel,
            RetryPolicy::new(3, Duration::from_secs(60)),
            succeed_on_nth(u32::MAX, count.clone()),
        )
        .await;

        assert!(start.elapsed() < Duration::from_secs(10));
        let err = result.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(err.to_string(), "context got cancelled: failed on try 1");
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_remaining_attempts() {
        let cancel = CancellationToken::new();
        cancel.cancel();

        let count = Arc::new(AtomicU32::new(0));
        let result = retry(
            &cancel,
            RetryPolicy::new(3, Duration::ZERO),
            succeed_on_nth(u32::MAX, count.clone()),
        )
        .await;

        assert!(result.unwrap_err().is_cancelled());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
