//
// Copyright (c) 2024, 2025 Oracle and/or its affiliates. All rights reserved.
//
// Licensed under the Universal Permissive License v 1.0 as shown at
//  https://oss.oracle.com/licenses/upl/
//
use crate::error::{ConnectError, ConnectErrorKind};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, trace};

/// Bounded exponential backoff with jitter, wrapping admin API calls.
///
/// Mirrors the shape documented for the Admin API Fetcher: base delay,
/// doubling factor, a hard cap, and +/-jitter to avoid thundering herds
/// across many instances refreshing at once.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    jitter_fraction: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            jitter_fraction: 0.2,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration, jitter_fraction: f64) -> Self {
        RetryPolicy {
            max_attempts,
            base_delay,
            max_delay,
            jitter_fraction,
        }
    }

    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.min(31));
        let scaled = self.base_delay.saturating_mul(factor).min(self.max_delay);
        let jitter = scaled.mul_f64(self.jitter_fraction);
        let jitter_ms = rand::thread_rng().gen_range(0..=jitter.as_millis().max(1) as u64);
        scaled.saturating_sub(jitter).saturating_add(Duration::from_millis(jitter_ms))
    }

    /// Runs `op` up to `max_attempts` times. `NotAuthorized` and `NotFound`
    /// are never retried, regardless of remaining attempts.
    pub async fn run<F, Fut, T>(&self, op_name: &str, mut op: F) -> Result<T, ConnectError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ConnectError>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(v) => return Ok(v),
                Err(e)
                    if matches!(
                        e.kind(),
                        ConnectErrorKind::NotAuthorized | ConnectErrorKind::NotFound
                    ) =>
                {
                    return Err(e);
                }
                Err(e) if attempt + 1 >= self.max_attempts || !e.is_retryable() => {
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.delay_for_attempt(attempt);
                    debug!(
                        "{op_name}: attempt {} failed ({e}), retrying in {:?}",
                        attempt + 1,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    trace!("{op_name}: starting attempt {}", attempt + 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn succeeds_without_retry_on_first_try() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<i32, ConnectError> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(42)
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_up_to_max_attempts() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5), 0.0);
        let calls = AtomicU32::new(0);
        let result: Result<i32, ConnectError> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectError::new(ConnectErrorKind::TransientApi, "boom"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_not_authorized() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<i32, ConnectError> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectError::new(ConnectErrorKind::NotAuthorized, "denied"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn does_not_retry_not_found() {
        let policy = RetryPolicy::default();
        let calls = AtomicU32::new(0);
        let result: Result<i32, ConnectError> = policy
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ConnectError::new(ConnectErrorKind::NotFound, "absent"))
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
