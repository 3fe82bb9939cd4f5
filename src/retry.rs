//! Bounded retry and polling helpers shared by dropdown selection,
//! page-ready waiting and download waiting.

use std::future::Future;
use std::ops::RangeInclusive;
use std::time::Duration;
use tokio::time::{sleep, Instant};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
    /// Multiplier applied to `delay` after each failed attempt. 1.0 keeps it fixed.
    pub backoff: f64,
}

impl RetryPolicy {
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
            backoff: 1.0,
        }
    }

    pub fn attempts(&self) -> RangeInclusive<u32> {
        1..=self.max_attempts
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1) as i32;
        self.delay.mul_f64(self.backoff.max(1.0).powi(exponent))
    }

    /// Sleeps between attempts; no-op after the last one.
    pub async fn pause(&self, attempt: u32) {
        if attempt < self.max_attempts {
            sleep(self.delay_after(attempt)).await;
        }
    }
}

/// How a single attempt failed.
#[derive(Debug)]
pub enum Attempt<E> {
    /// Worth another try.
    Transient(String),
    /// Stop retrying and hand the error back.
    Fatal(E),
}

#[derive(Debug, PartialEq)]
pub enum RetryError<E> {
    Exhausted { attempts: u32, last: String },
    Aborted(E),
}

/// Runs `op` until it succeeds, fails fatally or the policy runs out of attempts.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, Attempt<E>>>,
{
    let mut last = String::from("no attempts made");
    for attempt in policy.attempts() {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(Attempt::Fatal(e)) => return Err(RetryError::Aborted(e)),
            Err(Attempt::Transient(reason)) => {
                tracing::debug!("Attempt {}/{} failed: {}", attempt, policy.max_attempts, reason);
                last = reason;
                policy.pause(attempt).await;
            }
        }
    }

    Err(RetryError::Exhausted {
        attempts: policy.max_attempts,
        last,
    })
}

/// Probes at `interval` until it yields a value or `timeout` elapses.
/// The probe always runs at least once.
pub async fn poll_until<T, F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_backoff_delays() {
        let policy = RetryPolicy {
            max_attempts: 4,
            delay: Duration::from_millis(100),
            backoff: 2.0,
        };
        assert_eq!(policy.delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.delay_after(3), Duration::from_millis(400));

        let fixed = RetryPolicy::fixed(3, Duration::from_secs(2));
        assert_eq!(fixed.delay_after(3), Duration::from_secs(2));
        assert_eq!(fixed.attempts().count(), 3);
    }

    #[tokio::test]
    async fn test_retry_stops_at_max_attempts() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);

        let result: Result<(), RetryError<()>> = retry(&policy, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(Attempt::Transient(format!("attempt {}", attempt))) }
        })
        .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 3,
                last: "attempt 3".to_string()
            })
        );
    }

    #[tokio::test]
    async fn test_retry_returns_first_success() {
        let policy = RetryPolicy::fixed(5, Duration::ZERO);
        let result: Result<u32, RetryError<()>> = retry(&policy, |attempt| async move {
            if attempt == 2 {
                Ok(attempt)
            } else {
                Err(Attempt::Transient("not yet".to_string()))
            }
        })
        .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn test_fatal_aborts_immediately() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::fixed(3, Duration::ZERO);
        let result: Result<(), RetryError<&str>> = retry(&policy, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Attempt::Fatal("gone")) }
        })
        .await;
        assert_eq!(result, Err(RetryError::Aborted("gone")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_poll_until_finds_value() {
        let calls = AtomicU32::new(0);
        let found = poll_until(Duration::from_secs(5), Duration::from_millis(1), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move { (n >= 2).then_some(n) }
        })
        .await;
        assert_eq!(found, Some(2));
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let calls = AtomicU32::new(0);
        let found: Option<()> = poll_until(Duration::from_millis(20), Duration::from_millis(5), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { None }
        })
        .await;
        assert!(found.is_none());
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }
}
