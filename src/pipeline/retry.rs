//! Retry policy for flaky network calls.
//!
//! Render services time out and return 5xx under load, so every call site
//! that talks to one is wrapped in a [`RetryPolicy`]. Policies are plain
//! values; each call gets its own attempt counter and there is no budget
//! shared between posters.
//!
//! Backoff is `base_delay * 2^(attempt-1)`, capped at `max_delay`.

use crate::error::PosterError;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts including the first one. Never below 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Errors for which another attempt is made.
    pub retryable: fn(&PosterError) -> bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
            retryable: PosterError::is_retryable,
        }
    }

    /// Render services: slow and occasionally overloaded.
    pub fn render_service() -> Self {
        Self::new(15, Duration::from_secs(2), Duration::from_secs(60))
    }

    /// Baseline reads from the object store.
    pub fn baseline_store() -> Self {
        Self::new(3, Duration::from_millis(500), Duration::from_secs(5))
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO)
    }

    pub fn with_max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n.max(1);
        self
    }

    pub fn with_delays(mut self, base: Duration, max: Duration) -> Self {
        self.base_delay = base;
        self.max_delay = max.max(base);
        self
    }

    /// Delay before attempt number `attempt` (1 = first retry).
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently or attempts run out.
    ///
    /// `op` receives the zero-based attempt number. The last error is
    /// returned unchanged.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T, PosterError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, PosterError>>,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if (self.retryable)(&e) && attempt + 1 < self.max_attempts => {
                    attempt += 1;
                    let delay = self.backoff(attempt);
                    warn!(
                        "{}: attempt {}/{} failed: {}; retrying in {}ms",
                        what,
                        attempt,
                        self.max_attempts,
                        e,
                        delay.as_millis()
                    );
                    sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::render_service()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::poster::PosterFormat;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient() -> PosterError {
        PosterError::TransientFetch {
            url: "http://render".into(),
            status: Some(503),
            reason: "HTTP 503".into(),
        }
    }

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2))
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(500));
        assert_eq!(p.backoff(0), Duration::ZERO);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(400));
        assert_eq!(p.backoff(4), Duration::from_millis(500));
        assert_eq!(p.backoff(40), Duration::from_millis(500));
    }

    #[test]
    fn zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0, Duration::ZERO, Duration::ZERO).max_attempts, 1);
        assert_eq!(RetryPolicy::none().with_max_attempts(0).max_attempts, 1);
    }

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let out = fast(5)
            .run("test", |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 2 {
                        Err(transient())
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = fast(3)
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(transient()) }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PosterError::TransientFetch { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_surface_immediately() {
        let calls = AtomicU32::new(0);
        let err = fast(10)
            .run("test", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async {
                    Err::<(), _>(PosterError::Conversion {
                        format: PosterFormat::Svg,
                        detail: "parse".into(),
                    })
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PosterError::Conversion { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
