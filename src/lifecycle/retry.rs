use crate::errors::CloudError;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retries transient provider failures with linear backoff.
///
/// Attempt `n` failing transiently sleeps `backoff * n` before attempt `n + 1`.
/// Non-transient errors return immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            backoff,
        }
    }

    pub fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> Result<T, CloudError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CloudError>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.attempts => {
                    warn!(
                        operation,
                        attempt,
                        max = self.attempts,
                        error = %e,
                        "Transient failure, retrying"
                    );
                    tokio::time::sleep(self.backoff * attempt).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let result = policy
            .run("ensure nic", || async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(CloudError::Transient("429".into()))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::new(2, Duration::ZERO)
            .run("ensure vm", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CloudError::Transient("503".into()))
            })
            .await;
        assert_eq!(result, Err(CloudError::Transient("503".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rejected_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = RetryPolicy::new(5, Duration::ZERO)
            .run("ensure vm", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(CloudError::Rejected("SkuNotAvailable".into()))
            })
            .await;
        assert!(matches!(result, Err(CloudError::Rejected(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
