//! Node-level retry with exponential backoff
//!
//! Transient collaborator failures (adapter timeout, unavailable capability,
//! busy render backend) are retried here, bounded by the node attempt cap.
//! This loop is independent of the guardrail/critic feedback-loop counter on
//! the aggregate.

use futures::future::BoxFuture;
use tracing::warn;

use crate::RetryConfig;

/// Run `op` until it succeeds, fails non-transiently, or exhausts the
/// attempt cap. The attempt number (zero-based) is passed to each try.
pub async fn with_backoff<T, E>(
    retry: &RetryConfig,
    attempt_cap: u32,
    is_transient: impl Fn(&E) -> bool,
    mut op: impl FnMut(u32) -> BoxFuture<'static, Result<T, E>>,
) -> Result<T, E>
where
    E: std::fmt::Display,
{
    let mut attempt = 0;
    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) if is_transient(&err) && attempt + 1 < attempt_cap => {
                let delay = retry.delay_for(attempt);
                warn!(
                    attempt = attempt + 1,
                    attempt_cap,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transient failure, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}
