use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry with exponential backoff
///
/// Attempt `k` (0-indexed) that fails is followed by a sleep of
/// `base_delay * 2^k`. There is no sleep after the final attempt, and the last
/// error is returned as-is so callers see the root cause.
///
/// The sleep is a plain `tokio::time::sleep`; dropping the returned future
/// cancels a pending backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self { max_retries, base_delay }
    }

    /// Delay inserted after failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .checked_mul(2u32.saturating_pow(attempt))
            .unwrap_or(Duration::MAX)
    }

    /// Retry every failure
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_if(op, |_| true).await
    }

    /// Retry only failures for which `should_retry` returns true; others are
    /// returned immediately.
    pub async fn run_if<T, E, F, Fut, P>(&self, mut op: F, should_retry: P) -> Result<T, E>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        P: Fn(&E) -> bool,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    if attempt >= self.max_retries || !should_retry(&err) {
                        return Err(err);
                    }
                    let delay = self.delay_for(attempt);
                    debug!(
                        "Attempt {}/{} failed, backing off {}ms",
                        attempt + 1,
                        self.max_retries + 1,
                        delay.as_millis()
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[derive(Debug, PartialEq, Eq)]
    struct Failure(u32);

    #[tokio::test(start_paused = true)]
    async fn test_succeeds_after_k_failures_with_exact_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<&str, Failure> = policy
            .run(|attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 { Err(Failure(attempt)) } else { Ok("done") }
                }
            })
            .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100 * (2^0 + 2^1)
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_failing_returns_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(50));
        let calls = Arc::new(AtomicU32::new(0));
        let start = Instant::now();

        let result: Result<(), Failure> = policy
            .run(|attempt| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Failure(attempt))
                }
            })
            .await;

        assert_eq!(result, Err(Failure(2)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // No sleep after the final attempt: 50 + 100
        assert_eq!(start.elapsed(), Duration::from_millis(150));
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_stops_immediately() {
        let policy = RetryPolicy::new(5, Duration::from_millis(10));
        let calls = Arc::new(AtomicU32::new(0));

        let result: Result<(), Failure> = policy
            .run_if(
                |_| {
                    let calls = calls.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Err(Failure(7))
                    }
                },
                |err| err.0 != 7,
            )
            .await;

        assert_eq!(result, Err(Failure(7)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_retries_means_single_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let result: Result<(), Failure> = RetryPolicy::new(0, Duration::from_millis(100))
            .run(|_| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(Failure(0))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_future_cancels_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_secs(60));
        let calls = Arc::new(AtomicU32::new(0));
        let calls_in_op = calls.clone();

        let run = policy.run(move |_| {
            let calls = calls_in_op.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Failure(0))
            }
        });

        let outcome = tokio::time::timeout(Duration::from_secs(1), run).await;
        assert!(outcome.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_millis(250));
        assert_eq!(policy.delay_for(0), Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(500));
        assert_eq!(policy.delay_for(3), Duration::from_millis(2000));
    }
}
