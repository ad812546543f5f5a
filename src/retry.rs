//! Retry with backoff.
//!
//! Two policies are used in the pipeline:
//!
//! - ingestion batches: up to 3 attempts, a fixed 30 s wait, retried only
//!   for transient (quota) failures;
//! - answering: up to 5 attempts, exponential wait starting at 2 s and
//!   capped at 15 s, retried for any failure.
//!
//! Sleeps use `tokio::time::sleep`, so they suspend only the calling task.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// A bounded retry schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    max_attempts: u32,
    base: Duration,
    cap: Duration,
    exponential: bool,
}

impl Backoff {
    /// Waits `base`, `2 × base`, `4 × base`, … never more than `cap`.
    pub fn exponential(max_attempts: u32, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base,
            cap,
            exponential: true,
        }
    }

    /// Waits `delay` after every failure.
    pub fn fixed(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base: delay,
            cap: delay,
            exponential: false,
        }
    }

    /// Total attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait after the `attempt`-th failure (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        if !self.exponential {
            return self.base;
        }
        let shift = attempt.saturating_sub(1).min(16);
        self.base.saturating_mul(1 << shift).min(self.cap)
    }
}

/// Run `op` until it succeeds, `should_retry` rejects the error, or the
/// policy's attempts are used up. The last error is returned.
pub async fn retry_with<T, E, F, Fut, R>(
    policy: &Backoff,
    label: &str,
    mut should_retry: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                let delay = policy.delay_after(attempt);
                warn!(
                    operation = label,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_secs = delay.as_secs_f64(),
                    error = %err,
                    "retrying after failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_schedule_caps() {
        let b = Backoff::exponential(5, Duration::from_secs(2), Duration::from_secs(15));
        let delays: Vec<u64> = (1..=5).map(|n| b.delay_after(n).as_secs()).collect();
        assert_eq!(delays, vec![2, 4, 8, 15, 15]);
    }

    #[test]
    fn test_fixed_schedule() {
        let b = Backoff::fixed(3, Duration::from_secs(30));
        assert_eq!(b.delay_after(1), Duration::from_secs(30));
        assert_eq!(b.delay_after(2), Duration::from_secs(30));
        assert_eq!(b.max_attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let calls = AtomicU32::new(0);
        let policy = Backoff::exponential(5, Duration::from_secs(2), Duration::from_secs(15));
        let start = tokio::time::Instant::now();
        let result: Result<u32, String> = retry_with(&policy, "test", |_| true, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(format!("fail {}", attempt))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(start.elapsed(), Duration::from_secs(6));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_stops_on_rejected_error() {
        let calls = AtomicU32::new(0);
        let policy = Backoff::fixed(3, Duration::from_secs(30));
        let start = tokio::time::Instant::now();
        let result: Result<(), String> = retry_with(&policy, "test", |_| false, |_| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err("fatal".to_string()) }
        })
        .await;
        assert_eq!(result, Err("fatal".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhausts_attempts() {
        let calls = AtomicU32::new(0);
        let policy = Backoff::fixed(3, Duration::from_secs(1));
        let result: Result<(), String> = retry_with(&policy, "test", |_| true, |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Err(format!("fail {}", attempt)) }
        })
        .await;
        assert_eq!(result, Err("fail 3".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
