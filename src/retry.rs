//! Bounded retry with exponential backoff for external service calls.
//!
//! Every network call the pipeline makes (embed, reformulate, answer) is
//! wrapped here by its owning client. Only errors marked transient
//! (rate limits, server errors, network failures) are retried; everything
//! else fails immediately. Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped).

use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Run `op` up to `max_retries + 1` times, sleeping with exponential
/// backoff between attempts. Returns the first success, the first
/// non-transient error, or the final error once attempts are exhausted.
pub async fn with_backoff<T, F, Fut>(max_retries: u32, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < max_retries => continue,
            Err(e) => return Err(e),
        }
    }
    unreachable!("retry loop returns on the final attempt")
}
