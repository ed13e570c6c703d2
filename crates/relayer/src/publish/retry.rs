//! Bounded retry with a caller-supplied backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Run `op` up to `max_attempts` times (at least once). `op` receives the 1-based
/// attempt number; `backoff(n)` is the pause after failed attempt `n`. The last
/// error is returned once attempts run out.
pub async fn retry<T, E, Op, Fut, B>(max_attempts: u32, backoff: B, mut op: Op) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    B: Fn(u32) -> Duration,
    E: Display,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(v) => return Ok(v),
            Err(e) if attempt < max_attempts => {
                tracing::debug!(attempt, max_attempts, error = %e, "attempt failed, retrying");
                tokio::time::sleep(backoff(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// `base * attempt`: 1x, 2x, 3x ...
pub fn linear_backoff(base: Duration) -> impl Fn(u32) -> Duration {
    move |attempt| base.saturating_mul(attempt)
}
