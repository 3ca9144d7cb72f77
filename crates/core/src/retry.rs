//! Automatic retries for requests that fail to start.

use std::future::Future;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use backoff::backoff::Backoff;
use helflinq_model::ErrorKind;
use tokio::select;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::client::ClientFailure;

/// Controls how often the coordinator retries a request that could not be
/// started because of a transport error.
///
/// Only the start of a request is retried. Once a stream has delivered its
/// first fragment, or when the provider rejected the request, the failure
/// is recorded on the transcript entry and the user decides whether to
/// retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    max_retries: u32,
    initial_interval: Duration,
    max_interval: Duration,
}

impl RetryPolicy {
    /// A policy that never retries. This is the default.
    #[inline]
    pub const fn never() -> Self {
        Self {
            max_retries: 0,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(8),
        }
    }

    /// A policy that retries up to `max_retries` times with exponential
    /// backoff.
    #[inline]
    pub const fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::never()
        }
    }

    /// Sets the delay before the first retry.
    #[inline]
    pub const fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self
    }

    /// Sets the upper bound for the delay between retries.
    #[inline]
    pub const fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    /// Returns the maximum number of retries.
    #[inline]
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Runs `op` until it succeeds, fails with a non-transport error, or the
    /// retries are used up. An attempt in flight is always awaited, but
    /// cancelling `token` cuts the wait before the next one short.
    pub(crate) async fn run<T, F, Fut>(
        &self,
        token: &CancellationToken,
        mut op: F,
    ) -> Result<T, ClientFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ClientFailure>>,
    {
        let mut backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.initial_interval)
            .with_max_interval(self.max_interval)
            .with_max_elapsed_time(None)
            .build();

        let mut retries = 0u32;
        loop {
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if err.kind != ErrorKind::Transport
                || retries >= self.max_retries
                || token.is_cancelled()
            {
                return Err(err);
            }
            let Some(delay) = backoff.next_backoff() else {
                return Err(err);
            };
            retries += 1;
            warn!("request failed to start, retry {retries} in {delay:?}: {err}");

            select! {
                biased;

                _ = token.cancelled() => {
                    debug!("retry abandoned on cancellation");
                    return Err(err);
                }
                _ = sleep(delay) => {}
            }
        }
    }
}

impl Default for RetryPolicy {
    #[inline]
    fn default() -> Self {
        Self::never()
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    fn failure(kind: ErrorKind) -> ClientFailure {
        ClientFailure {
            kind,
            message: "nope".to_owned(),
        }
    }

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::with_max_retries(max_retries)
            .with_initial_interval(Duration::from_millis(1))
            .with_max_interval(Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_never_runs_once() {
        let calls = Cell::new(0);
        let result: Result<(), _> = RetryPolicy::never()
            .run(&CancellationToken::new(), || {
                calls.set(calls.get() + 1);
                async { Err(failure(ErrorKind::Transport)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_transport_errors_are_retried() {
        let calls = Cell::new(0);
        let result = fast(3)
            .run(&CancellationToken::new(), || {
                calls.set(calls.get() + 1);
                let n = calls.get();
                async move {
                    if n < 3 {
                        Err(failure(ErrorKind::Transport))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result, Ok(3));
    }

    #[tokio::test]
    async fn test_retries_are_bounded() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast(2)
            .run(&CancellationToken::new(), || {
                calls.set(calls.get() + 1);
                async { Err(failure(ErrorKind::Transport)) }
            })
            .await;
        assert_eq!(result, Err(failure(ErrorKind::Transport)));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn test_provider_errors_are_not_retried() {
        let calls = Cell::new(0);
        let result: Result<(), _> = fast(5)
            .run(&CancellationToken::new(), || {
                calls.set(calls.get() + 1);
                async { Err(failure(ErrorKind::Provider)) }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_stops_retrying() {
        let token = CancellationToken::new();
        let calls = Cell::new(0);
        let result: Result<(), _> = fast(5)
            .run(&token, || {
                calls.set(calls.get() + 1);
                token.cancel();
                async { Err(failure(ErrorKind::Transport)) }
            })
            .await;
        assert_eq!(result, Err(failure(ErrorKind::Transport)));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_cuts_backoff_short() {
        let token = CancellationToken::new();
        let policy = RetryPolicy::with_max_retries(3)
            .with_initial_interval(Duration::from_secs(30))
            .with_max_interval(Duration::from_secs(30));
        let calls = Cell::new(0);

        let canceller = {
            let token = token.clone();
            async move {
                sleep(Duration::from_millis(20)).await;
                token.cancel();
            }
        };
        let run = policy.run(&token, || {
            calls.set(calls.get() + 1);
            async { Err::<(), _>(failure(ErrorKind::Transport)) }
        });
        let (result, ()) = tokio::time::timeout(
            Duration::from_secs(1),
            async { tokio::join!(run, canceller) },
        )
        .await
        .unwrap();

        assert_eq!(result, Err(failure(ErrorKind::Transport)));
        assert_eq!(calls.get(), 1);
    }
}
