use crate::core::market::FetchError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry settings for one upstream request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Upper bound for a single attempt.
    pub timeout: Duration,
    /// Backoff before attempt `n + 1` is `backoff_step * n`.
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            timeout: Duration::from_secs(10),
            backoff_step: Duration::from_millis(200),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout(Duration::ZERO)
        } else if let Some(status) = err.status() {
            FetchError::Status {
                status: status.as_u16(),
                url: err.url().map(|u| u.to_string()).unwrap_or_default(),
            }
        } else if err.is_decode() {
            FetchError::Decode(err.to_string())
        } else if err.is_builder() {
            FetchError::Request(err.to_string())
        } else {
            FetchError::Io(err.to_string())
        }
    }
}

/// Retries an async operation while its failures are transient.
///
/// Each attempt is bounded by `policy.timeout`, attempts are separated by a linear
/// backoff, and `cancel` aborts both the running attempt and the backoff wait.
///
/// # Returns
/// Either the successful result or the last error
pub async fn with_retry<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut operation: F,
) -> Result<T, FetchError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, FetchError>>,
{
    let attempts = policy.attempts.max(1);
    let mut attempt = 1;
    loop {
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            outcome = tokio::time::timeout(policy.timeout, operation()) => outcome,
        };

        let err = match outcome {
            Ok(Ok(val)) => return Ok(val),
            Ok(Err(err)) => err,
            Err(_) => FetchError::Timeout(policy.timeout),
        };

        if !err.is_transient() {
            debug!("Attempt {}/{} failed permanently: {}", attempt, attempts, err);
            return Err(err);
        }
        if attempt >= attempts {
            warn!("Giving up after {} attempts: {}", attempts, err);
            return Err(err);
        }

        let delay = policy.backoff_step * attempt;
        debug!(
            "Attempt {}/{} failed: {}. Retrying in {:?}...",
            attempt, attempts, err, delay
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            attempts: 3,
            timeout: Duration::from_millis(200),
            backoff_step: Duration::from_millis(5),
        }
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), &CancellationToken::new(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(FetchError::Status {
                    status: 503,
                    url: "u".to_string(),
                })
            } else {
                Ok(42)
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), &CancellationToken::new(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Status {
                status: 404,
                url: "u".to_string(),
            })
        })
        .await;

        assert!(matches!(result, Err(FetchError::Status { status: 404, .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_return_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), &CancellationToken::new(), || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(FetchError::Io("connection reset".to_string()))
        })
        .await;

        assert_eq!(result, Err(FetchError::Io("connection reset".to_string())));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempt_timeout_is_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy {
            timeout: Duration::from_millis(20),
            ..fast_policy()
        };
        let result = with_retry(&policy, &CancellationToken::new(), || async {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok("done")
        })
        .await;

        assert_eq!(result, Ok("done"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_immediately() {
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result: Result<(), _> = with_retry(&fast_policy(), &cancel, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        assert_eq!(result, Err(FetchError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
