use std::time::Duration;

use thiserror::Error;
use tracing::warn;

/// Failure of a search or markup-fetch call. Transient errors qualify for
/// retry; permanent ones surface immediately as a failed unit of work.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("transient: {0}")]
    Transient(String),
    #[error("permanent: {0}")]
    Permanent(String),
}

impl FetchError {
    pub fn is_transient(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    /// Classify an HTTP status code. Timeouts and rate limits come back,
    /// definitive rejections do not.
    pub fn from_status(status: u16, context: &str) -> Self {
        match status {
            408 | 429 | 500..=599 => FetchError::Transient(format!("{context}: HTTP {status}")),
            _ => FetchError::Permanent(format!("{context}: HTTP {status}")),
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        // Transport-level failures (timeout, connect, reset) are retryable.
        if e.is_timeout() || e.is_connect() || e.is_request() {
            FetchError::Transient(e.to_string())
        } else {
            FetchError::Permanent(e.to_string())
        }
    }
}

/// Explicit retry policy: bounded attempts, exponential backoff, only
/// transient errors qualify.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration) -> Self {
        Self { max_attempts, base_backoff }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff * 2u32.saturating_pow(attempt)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, FetchError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, FetchError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() && attempt + 1 < self.max_attempts => {
                    let backoff = self.backoff(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), backing off {:.1}s: {}",
                        what,
                        attempt + 1,
                        self.max_attempts,
                        backoff.as_secs_f64(),
                        e
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn status_classification() {
        assert!(FetchError::from_status(429, "search").is_transient());
        assert!(FetchError::from_status(503, "search").is_transient());
        assert!(!FetchError::from_status(404, "detail").is_transient());
        assert!(!FetchError::from_status(400, "search").is_transient());
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let out = policy
            .run("op", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(FetchError::Transient("flaky".into()))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(out.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn bounded_attempts_then_error() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let out: Result<(), _> = policy
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::Transient("down".into())) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let out: Result<(), _> = policy
            .run("op", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FetchError::Permanent("gone".into())) }
            })
            .await;
        assert!(out.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
