// src/gateway/retry.rs
//! Bounded exponential backoff + jitter for transient provider failures
//! (§4.1, §7). Non-retryable failures (auth, quota, dimension mismatch,
//! malformed response) must never reach this helper — callers branch on
//! `GatewayError::is_retryable` before invoking it.

use crate::config::ResilienceConfig;
use crate::error::GatewayError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

pub async fn with_retry<T, F, Fut>(
    config: &ResilienceConfig,
    provider_name: &str,
    mut attempt: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut last_err = None;
    for attempt_no in 0..=config.max_retries {
        match attempt().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt_no < config.max_retries => {
                let delay = backoff_delay(config.retry_delay_base_ms, attempt_no);
                warn!(
                    provider = provider_name,
                    attempt = attempt_no,
                    delay_ms = delay.as_millis() as u64,
                    "retrying transient provider error"
                );
                tokio::time::sleep(delay).await;
                last_err = Some(err);
            }
            Err(err) => return Err(err),
        }
    }
    Err(last_err.unwrap_or(GatewayError::AllProvidersUnavailable { task: "unknown" }))
}

/// `base * 2^attempt` capped at 30s, plus up to 50% jitter.
fn backoff_delay(base_ms: u64, attempt: usize) -> Duration {
    let exp = base_ms.saturating_mul(1u64 << attempt.min(10));
    let capped = exp.min(30_000);
    let jitter_fraction: f64 = rand::rng().random_range(0.0..0.5);
    let jittered = capped as f64 * (1.0 + jitter_fraction);
    Duration::from_millis(jittered as u64)
}
