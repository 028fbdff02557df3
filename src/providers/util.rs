use anyhow::Error;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::debug;

pub const USER_AGENT: &str = "navcast/0.1";

/// Retries an async operation with configurable attempts and delays
///
/// # Parameters
/// - `operation`: Closure returning a future
/// - `retries`: Number of retry attempts (total runs = 1 initial + retries)
/// - `delay_ms`: Milliseconds before the first retry, doubled on each further one
///
/// # Returns
/// Either the successful result or the error after all attempts
pub async fn with_retry<F, Fut, T, E>(mut operation: F, retries: usize, delay_ms: u64) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Into<Error>,
{
    let mut attempt = 1;
    let mut delay = Duration::from_millis(delay_ms);
    loop {
        match operation().await.map_err(Into::into) {
            Ok(val) => return Ok(val),
            Err(err) => {
                if attempt > retries {
                    return Err(err);
                }
                debug!(
                    "Attempt {}/{} failed: {}. Retrying in {:?}...",
                    attempt, retries, err, delay
                );
                attempt += 1;
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}

struct FailureState {
    count: u32,
    next_at: Instant,
}

/// Per-key exponential cooldown after failed fetches.
pub struct KeyedBackoff {
    base: Duration,
    max: Duration,
    failures: Mutex<HashMap<String, FailureState>>,
}

impl KeyedBackoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: Mutex::new(HashMap::new()),
        }
    }

    /// Time left before `key` may be fetched again.
    pub fn remaining(&self, key: &str) -> Option<Duration> {
        let failures = self.failures.lock().expect("backoff map poisoned");
        let left = failures.get(key)?.next_at.checked_duration_since(Instant::now())?;
        (!left.is_zero()).then_some(left)
    }

    /// Records a failure and returns the cooldown now in force.
    pub fn fail(&self, key: &str) -> Duration {
        let mut failures = self.failures.lock().expect("backoff map poisoned");
        let state = failures.entry(key.to_string()).or_insert(FailureState {
            count: 0,
            next_at: Instant::now(),
        });
        state.count += 1;
        let factor = 2u32.saturating_pow(state.count - 1);
        let delay = self.base.saturating_mul(factor).min(self.max);
        state.next_at = Instant::now() + delay;
        delay
    }

    pub fn succeed(&self, key: &str) {
        self.failures
            .lock()
            .expect("backoff map poisoned")
            .remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_with_retry_succeeds_after_failures() {
        let calls = AtomicUsize::new(0);
        let result: Result<u32, Error> = with_retry(
            || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(anyhow::anyhow!("flaky"))
                } else {
                    Ok(7)
                }
            },
            3,
            1,
        )
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_gives_up() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), Error> = with_retry(
            || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(anyhow::anyhow!("down"))
            },
            2,
            1,
        )
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_keyed_backoff_doubles_and_caps() {
        let backoff = KeyedBackoff::new(Duration::from_secs(10), Duration::from_secs(300));
        assert!(backoff.remaining("161725").is_none());

        let delays: Vec<u64> = (0..7).map(|_| backoff.fail("161725").as_secs()).collect();
        assert_eq!(delays, vec![10, 20, 40, 80, 160, 300, 300]);
        assert!(backoff.remaining("161725").is_some());
        assert!(backoff.remaining("000001").is_none());

        backoff.succeed("161725");
        assert!(backoff.remaining("161725").is_none());
    }
}
