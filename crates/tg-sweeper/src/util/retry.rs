use crate::prelude::*;
use chrono::prelude::*;
use retry_policies::policies::ExponentialBackoff;
use retry_policies::{RetryDecision, RetryPolicy as _};
use std::future::Future;
use std::time::Duration;

/// Decides how many times and how long to wait between the attempts of an
/// operation that talks to an unreliable external channel.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    backoff: ExponentialBackoff,
}

impl RetryPolicy {
    /// Retry exponentially increasing intervals between attempts bounded
    /// by `min_interval` and `max_interval`.
    pub fn exponential(max_retries: u32, min_interval: Duration, max_interval: Duration) -> Self {
        let backoff = ExponentialBackoff::builder()
            .retry_bounds(min_interval, max_interval.max(min_interval))
            .build_with_max_retries(max_retries);

        Self { backoff }
    }

    /// Policy that gives up right after the first failure.
    pub fn none() -> Self {
        Self::exponential(0, Duration::from_millis(1), Duration::from_millis(1))
    }

    pub fn max_retries(&self) -> u32 {
        self.backoff.max_n_retries
    }

    /// Runs the operation until it succeeds, fails with an error for which
    /// `is_retryable` returns `false`, or the policy gives up. The error of
    /// the last attempt is returned in the latter two cases.
    pub async fn run<T, E, Fut>(
        &self,
        operation: impl FnMut() -> Fut,
        is_retryable: impl Fn(&E) -> bool,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        self.run_with_min_delay(operation, is_retryable, |_| None)
            .await
    }

    /// Same as [`RetryPolicy::run`], but never sleeps before the next attempt
    /// less than `min_delay` returns for the error, e.g. the delay that the
    /// remote side requested in its rate limit response.
    pub async fn run_with_min_delay<T, E, Fut>(
        &self,
        mut operation: impl FnMut() -> Fut,
        is_retryable: impl Fn(&E) -> bool,
        min_delay: impl Fn(&E) -> Option<Duration>,
    ) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::error::Error + 'static,
    {
        let mut attempt = 0;
        loop {
            let err = match operation().await {
                Ok(output) => {
                    if attempt > 0 {
                        warn!(%attempt, "Operation succeeded after a retry");
                    }
                    return Ok(output);
                }
                Err(err) => err,
            };

            if !is_retryable(&err) {
                if attempt > 0 {
                    warn!(%attempt, "Operation failed with a non-retryable error after a retry");
                }
                return Err(err);
            }

            let execute_after = match self.backoff.should_retry(attempt) {
                RetryDecision::Retry { execute_after } => execute_after,
                RetryDecision::DoNotRetry => {
                    warn!(
                        %attempt,
                        err = tracing_err(&err),
                        "Giving up retrying the operation",
                    );
                    return Err(err);
                }
            };

            let backoff = execute_after
                .signed_duration_since(Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO);

            let duration = min_delay(&err).map_or(backoff, |min| min.max(backoff));

            warn!(
                %attempt,
                err = tracing_err(&err),
                duration = tracing_duration(duration),
                "Sleeping before the next attempt",
            );

            tokio::time::sleep(duration).await;

            attempt += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[derive(Debug, thiserror::Error)]
    enum TestError {
        #[error("transient")]
        Transient,

        #[error("permanent")]
        Permanent,
    }

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy::exponential(
            max_retries,
            Duration::from_millis(1),
            Duration::from_millis(2),
        )
    }

    fn is_transient(err: &TestError) -> bool {
        matches!(err, TestError::Transient)
    }

    #[test_log::test(tokio::test)]
    async fn succeeds_after_transient_failures() {
        let attempts = Cell::new(0);

        let result = fast_policy(3)
            .run(
                || {
                    attempts.set(attempts.get() + 1);
                    let attempt = attempts.get();
                    async move {
                        if attempt < 3 {
                            return Err(TestError::Transient);
                        }
                        Ok(attempt)
                    }
                },
                is_transient,
            )
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(attempts.get(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn gives_up_after_max_retries() {
        let attempts = Cell::new(0);

        let result: Result<(), _> = fast_policy(2)
            .run(
                || {
                    attempts.set(attempts.get() + 1);
                    async { Err(TestError::Transient) }
                },
                is_transient,
            )
            .await;

        assert_matches::assert_matches!(result, Err(TestError::Transient));
        // The initial attempt plus two retries
        assert_eq!(attempts.get(), 3);
    }

    #[test_log::test(tokio::test)]
    async fn never_retries_permanent_errors() {
        let attempts = Cell::new(0);

        let result: Result<(), _> = fast_policy(5)
            .run(
                || {
                    attempts.set(attempts.get() + 1);
                    async { Err(TestError::Permanent) }
                },
                is_transient,
            )
            .await;

        assert_matches::assert_matches!(result, Err(TestError::Permanent));
        assert_eq!(attempts.get(), 1);
    }

    #[test_log::test(tokio::test)]
    async fn waits_at_least_the_requested_delay() {
        let attempts = Cell::new(0);
        let start = std::time::Instant::now();

        let result = fast_policy(1)
            .run_with_min_delay(
                || {
                    attempts.set(attempts.get() + 1);
                    let attempt = attempts.get();
                    async move {
                        if attempt == 1 {
                            return Err(TestError::Transient);
                        }
                        Ok(())
                    }
                },
                is_transient,
                |_| Some(Duration::from_millis(50)),
            )
            .await;

        assert!(result.is_ok());
        assert_eq!(attempts.get(), 2);
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test_log::test(tokio::test)]
    async fn none_policy_runs_once() {
        let attempts = Cell::new(0);

        let result: Result<(), _> = RetryPolicy::none()
            .run(
                || {
                    attempts.set(attempts.get() + 1);
                    async { Err(TestError::Transient) }
                },
                is_transient,
            )
            .await;

        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
        assert_eq!(RetryPolicy::none().max_retries(), 0);
    }
}
