use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

/// Backoff schedule for operations that lose an optimistic-concurrency race.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Total attempts including the first; 0 is treated as 1
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub backoff_factor: f64,
    /// Scale each delay by a random factor in [0.5, 1.0) so contenders spread out
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            initial_backoff_ms: 5,
            max_backoff_ms: 200,
            backoff_factor: 2.0,
            jitter: true,
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `failures_so_far + 1`, before jitter.
    ///
    /// delay_n = initial * factor^n, capped at `max_backoff_ms`.
    pub fn base_delay_ms(&self, failures_so_far: u32) -> u64 {
        let exp = failures_so_far.min(i32::MAX as u32) as i32;
        let raw = (self.initial_backoff_ms as f64 * self.backoff_factor.powi(exp)).round();
        if !raw.is_finite() || raw >= self.max_backoff_ms as f64 {
            self.max_backoff_ms
        } else {
            raw.max(0.0) as u64
        }
    }

    pub fn delay(&self, failures_so_far: u32) -> Duration {
        let base = self.base_delay_ms(failures_so_far);
        if self.jitter && base > 0 {
            let factor: f64 = rand::rng().random_range(0.5..1.0);
            Duration::from_millis((base as f64 * factor).round() as u64)
        } else {
            Duration::from_millis(base)
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Outcome of [`retry_with_backoff`] when the retry budget ran out.
#[derive(Debug)]
pub enum RetryError<E> {
    /// A non-retryable error, returned as soon as it was seen
    Fatal(E),
    /// Every attempt hit a retryable error; carries the last one
    Exhausted { attempts: u32, last: E },
}

/// Run `op` until it succeeds, fails with an error `is_retryable` rejects, or
/// the policy's attempt budget is spent. Sleeps between attempts.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &BackoffPolicy,
    op_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let attempts = policy.attempts();
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if is_retryable(&e) => {
                attempt += 1;
                if attempt >= attempts {
                    return Err(RetryError::Exhausted { attempts, last: e });
                }
                let delay = policy.delay(attempt - 1);
                debug!(
                    op = op_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transaction conflict, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(RetryError::Fatal(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 5,
            initial_backoff_ms: 10,
            max_backoff_ms: 50,
            backoff_factor: 2.0,
            jitter,
        }
    }

    #[test]
    fn base_delay_is_exponential_and_capped() {
        let p = policy(false);
        assert_eq!(p.base_delay_ms(0), 10);
        assert_eq!(p.base_delay_ms(1), 20);
        assert_eq!(p.base_delay_ms(2), 40);
        assert_eq!(p.base_delay_ms(3), 50);
        assert_eq!(p.base_delay_ms(60), 50);
    }

    #[test]
    fn jitter_stays_within_half_to_full_delay() {
        let p = policy(true);
        for _ in 0..100 {
            let d = p.delay(1).as_millis() as u64;
            assert!((10..=20).contains(&d), "delay {} out of range", d);
        }
    }

    #[test]
    fn zero_attempts_still_runs_once() {
        let p = BackoffPolicy {
            max_attempts: 0,
            ..policy(false)
        };
        assert_eq!(p.attempts(), 1);
    }

    #[tokio::test]
    async fn retries_until_success() {
        let p = BackoffPolicy {
            initial_backoff_ms: 1,
            ..policy(false)
        };
        let result: Result<u32, RetryError<&str>> =
            retry_with_backoff(&p, "test", |_| true, |attempt| async move {
                if attempt < 3 { Err("conflict") } else { Ok(attempt) }
            })
            .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let p = BackoffPolicy {
            initial_backoff_ms: 1,
            ..policy(false)
        };
        let result: Result<(), RetryError<&str>> =
            retry_with_backoff(&p, "test", |_| true, |_| async { Err("conflict") }).await;
        match result {
            Err(RetryError::Exhausted { attempts, last }) => {
                assert_eq!(attempts, 5);
                assert_eq!(last, "conflict");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let p = policy(false);
        let mut calls = 0;
        let result: Result<(), RetryError<&str>> = retry_with_backoff(
            &p,
            "test",
            |e: &&str| *e == "conflict",
            |_| {
                calls += 1;
                async { Err("broken") }
            },
        )
        .await;
        assert!(matches!(result, Err(RetryError::Fatal("broken"))));
        assert_eq!(calls, 1);
    }
}
