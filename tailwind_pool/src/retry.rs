//! Exponential-backoff executor for retryable operations (§4.E), used by the pool to retry
//! Worker spawns.

use std::time::Duration;

use crate::error::Error;

/// Runs `f` until it succeeds, returns a permanent error, or exhausts `max_attempts`.
///
/// The delay before attempt `n` (0-based, so the first retry after attempt 0 fails) is
/// `trunc(base_delay * factor^n)`. Errors for which [`Error::is_permanent`] returns `true` are
/// returned immediately without consuming further attempts.
pub async fn with_backoff<T, F, Fut>(
    mut f: F,
    max_attempts: u32,
    base_delay: Duration,
    factor: f64,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
{
    let mut attempt = 0_u32;
    loop {
        match f().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_permanent() => return Err(e),
            Err(e) => {
                attempt += 1;
                if attempt >= max_attempts {
                    return Err(Error::MaxRetriesExceeded {
                        attempts: attempt,
                        last_error: e.to_string(),
                    });
                }
                let delay_ms = (base_delay.as_millis() as f64) * factor.powi((attempt - 1) as i32);
                tokio::time::sleep(Duration::from_millis(delay_ms.trunc() as u64)).await;
            }
        }
    }
}
