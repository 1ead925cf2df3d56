//! Bounded-attempts retry helper with exponential backoff
//!
//! Retry loops in this service are explicit typed-result helpers, never
//! exception-style control flow threaded across layers. The `retryable`
//! predicate lets callers stop early on permanent errors (invalid chat
//! target, oversized item) instead of burning attempts.

use std::time::Duration;
use tracing::warn;

/// Cap on the backoff delay between attempts.
const MAX_DELAY: Duration = Duration::from_secs(10);

/// Retry an async operation with exponential backoff.
///
/// Returns `Ok` on first success, or the last `Err` once attempts are
/// exhausted or `retryable` says the error is permanent.
/// Delays: `initial_delay`, `2 * initial_delay`, ... capped at 10s.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    operation_name: &str,
    max_attempts: u32,
    initial_delay: Duration,
    retryable: R,
    mut f: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut delay = initial_delay;
    let mut last_err = None;

    for attempt in 1..=max_attempts {
        match f().await {
            Ok(val) => return Ok(val),
            Err(e) => {
                warn!(
                    "{} failed (attempt {}/{}): {}",
                    operation_name, attempt, max_attempts, e
                );
                let permanent = !retryable(&e);
                last_err = Some(e);
                if permanent {
                    break;
                }
                if attempt < max_attempts {
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(MAX_DELAY);
                }
            }
        }
    }

    Err(last_err.expect("at least one attempt"))
}
