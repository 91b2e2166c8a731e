//! Bounded timeout + retry wrapper for store and transport calls.

use std::{future::Future, time::Duration};

use tokio::time::{sleep, timeout};

use crate::{Error, Result};

#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub attempts: u32,
    /// Per-attempt deadline.
    pub timeout: Duration,
    /// Linear backoff step between attempts.
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn once(timeout: Duration) -> Self {
        Self {
            attempts: 1,
            timeout,
            backoff: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let err = match timeout(self.timeout, op()).await {
                Ok(Ok(v)) => return Ok(v),
                Ok(Err(e)) => e,
                Err(_) => Error::Timeout(format!("{label} after {:?}", self.timeout)),
            };

            if attempt >= attempts || !is_transient(&err) {
                return Err(err);
            }

            tracing::warn!(%label, attempt, error = %err, "transient failure, retrying");
            sleep(self.backoff * attempt).await;
        }
    }
}

fn is_transient(err: &Error) -> bool {
    matches!(err, Error::Io(_) | Error::Timeout(_) | Error::External(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::PollError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            timeout: Duration::from_millis(100),
            backoff: Duration::from_millis(10),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let out = policy(3)
            .run("flaky", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(Error::External("boom".to_string()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(out, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let err = policy(2)
            .run("down", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::External("down".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::External(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_policy_errors() {
        let calls = AtomicU32::new(0);
        let err = policy(5)
            .run("policy", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(Error::Poll(PollError::NotFound))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Poll(PollError::NotFound)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_calls_time_out() {
        let err = policy(1)
            .run("slow", || async {
                sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Timeout(_)));
    }
}
