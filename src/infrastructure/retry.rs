//! Retry policy for transient failures.
//!
//! Capped exponential backoff: 100 ms, 400 ms, 1.6 s, three attempts in
//! total before the error surfaces.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use tracing::warn;

use crate::domain::errors::{DomainError, DomainResult};

const INITIAL_INTERVAL: Duration = Duration::from_millis(100);
const MULTIPLIER: f64 = 4.0;
const MAX_ATTEMPTS: u32 = 3;

fn transient_backoff() -> ExponentialBackoff {
    ExponentialBackoff {
        initial_interval: INITIAL_INTERVAL,
        multiplier: MULTIPLIER,
        randomization_factor: 0.0,
        max_interval: Duration::from_millis(1600),
        max_elapsed_time: None,
        ..ExponentialBackoff::default()
    }
}

/// Run an operation, retrying transient domain errors up to the attempt
/// cap. Non-transient errors surface immediately.
pub async fn with_retry<T, F, Fut>(label: &str, mut operation: F) -> DomainResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = DomainResult<T>>,
{
    let mut backoff = transient_backoff();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < MAX_ATTEMPTS => {
                let delay = backoff.next_backoff().unwrap_or(INITIAL_INTERVAL);
                warn!(label, attempt, delay_ms = delay.as_millis() as u64, error = %e, "transient failure, retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_transient_errors_retried_to_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_retry("flaky", move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(DomainError::DatabaseBusy("locked".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_attempts_capped() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: DomainResult<()> = with_retry("always-busy", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DomainError::DatabaseBusy("locked".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_errors_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: DomainResult<()> = with_retry("invalid", move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(DomainError::ValidationFailed("bad input".into()))
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
