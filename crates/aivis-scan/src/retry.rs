//! Exponential back-off with jitter for analysis module attempts.
//!
//! [`retry_with_backoff`] re-runs a module attempt while the error it returns
//! is transient (see [`ModuleError::is_transient`]). Each module retries on
//! its own schedule; siblings are never delayed by one module's back-off.

use std::future::Future;
use std::time::Duration;

use aivis_core::ModuleKind;

use crate::error::ModuleError;

const MAX_DELAY_MS: u64 = 60_000;

/// Runs `operation` with up to `max_retries` additional attempts on transient
/// errors.
///
/// With `backoff_base_ms = 500` the sleeps before attempts 2, 3 and 4 are
/// 500 ms, 1 s and 2 s, each scaled by a random factor in `[0.75, 1.25)` and
/// capped at 60 s.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    module: ModuleKind,
    max_retries: u32,
    backoff_base_ms: u64,
    mut operation: F,
) -> Result<T, ModuleError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ModuleError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation(attempt + 1).await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_transient() || attempt >= max_retries {
                    return Err(err);
                }
                attempt += 1;
                let delay_ms = backoff_delay_ms(backoff_base_ms, attempt);
                tracing::warn!(
                    %module,
                    attempt,
                    max_retries,
                    delay_ms,
                    error = %err,
                    "analysis module transient error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn backoff_delay_ms(backoff_base_ms: u64, attempt: u32) -> u64 {
    let computed = backoff_base_ms.saturating_mul(1u64 << attempt.saturating_sub(1).min(10));
    let capped = computed.min(MAX_DELAY_MS);
    (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64
}
