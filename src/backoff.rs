//! Bounded exponential-backoff retry for remote calls.
//!
//! Every remote endpoint the pipeline talks to (mail listing, mail fetch,
//! embedding) goes through [`Backoff::execute`]. Failures are classified
//! up front into [`RemoteError`] variants; only transient failures are
//! retried.
//!
//! # Retry strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - Connection/timeout errors → retry
//! - HTTP 401/403 → fail immediately, surfaced as an auth error
//! - Any other failure → fail immediately
//! - Delay before attempt `n+1`: `2^n + uniform(0, 1)` seconds

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::warn;

/// Default attempt budget, matching the upstream API guidance.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// A remote call failure, classified for retry purposes.
#[derive(Debug, Clone, Error)]
pub enum RemoteError {
    /// Rate limited or server-side unavailable; safe to retry.
    #[error("transient upstream error (status {status})")]
    Transient { status: u16 },
    /// Unauthorized or forbidden; requires re-authentication, never retried.
    #[error("authentication rejected by upstream (status {status})")]
    Auth { status: u16 },
    /// Anything else; never retried.
    #[error("{0}")]
    Fatal(String),
}

impl RemoteError {
    /// Classify an HTTP status code.
    pub fn from_status(status: u16) -> Self {
        match status {
            429 | 500..=599 => RemoteError::Transient { status },
            401 | 403 => RemoteError::Auth { status },
            other => RemoteError::Fatal(format!("unexpected upstream status {}", other)),
        }
    }

    /// Classify a reqwest transport error. Connection and timeout failures
    /// are treated as server-side unavailability.
    pub fn from_transport(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            RemoteError::Transient { status: 0 }
        } else {
            RemoteError::Fatal(err.to_string())
        }
    }
}

/// Error returned by [`Backoff::execute`].
#[derive(Debug, Error)]
pub enum BackoffError {
    /// The attempt budget was exhausted on transient failures.
    #[error("retries exhausted after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: RemoteError },
    /// The operation failed with a non-retryable classification.
    #[error(transparent)]
    Aborted(RemoteError),
}

impl BackoffError {
    /// True when the underlying failure was an authentication rejection.
    pub fn is_auth(&self) -> bool {
        matches!(self, BackoffError::Aborted(RemoteError::Auth { .. }))
    }
}

/// Executes remote operations with bounded exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    max_retries: u32,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl Backoff {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Run `op` until it succeeds, fails non-transiently, or the attempt
    /// budget runs out. `op` is re-invoked from scratch on each attempt.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, BackoffError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        let mut last = RemoteError::Transient { status: 0 };

        for attempt in 0..self.max_retries {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err @ RemoteError::Transient { .. }) => {
                    let delay = (1u64 << attempt) as f64 + rand::thread_rng().gen::<f64>();
                    warn!(attempt, delay_secs = delay, error = %err, "transient upstream error, retrying");
                    last = err;
                    tokio::time::sleep(Duration::from_secs_f64(delay)).await;
                }
                Err(err) => return Err(BackoffError::Aborted(err)),
            }
        }

        Err(BackoffError::RetriesExhausted {
            attempts: self.max_retries,
            last,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    async fn flaky(calls: &AtomicU32, failures: u32) -> Result<u32, RemoteError> {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Err(RemoteError::Transient { status: 429 })
        } else {
            Ok(n)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = Backoff::default().execute(|| flaky(&calls, 3)).await;
        // Three 429s, success on the fourth attempt: exactly 3 retries.
        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn auth_failure_is_never_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = Backoff::default()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Auth { status: 403 }) }
            })
            .await;
        assert!(result.unwrap_err().is_auth());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_failure_is_never_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = Backoff::default()
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Fatal("bad request".into())) }
            })
            .await;
        assert!(matches!(
            result.unwrap_err(),
            BackoffError::Aborted(RemoteError::Fatal(_))
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_attempt_budget() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = Backoff::new(5)
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(RemoteError::Transient { status: 503 }) }
            })
            .await;
        assert!(matches!(
            result.unwrap_err(),
            BackoffError::RetriesExhausted { attempts: 5, .. }
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn classifies_status_codes() {
        assert!(matches!(
            RemoteError::from_status(429),
            RemoteError::Transient { status: 429 }
        ));
        assert!(matches!(
            RemoteError::from_status(503),
            RemoteError::Transient { status: 503 }
        ));
        assert!(matches!(
            RemoteError::from_status(401),
            RemoteError::Auth { status: 401 }
        ));
        assert!(matches!(
            RemoteError::from_status(404),
            RemoteError::Fatal(_)
        ));
    }
}
