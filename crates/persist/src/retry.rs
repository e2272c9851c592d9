//! Retry machinery for the per-node persistence write lane.
//!
//! MemoryFirst writes must eventually become durable without ever blocking
//! the node's message loop, so the write lane retries transient failures
//! forever: exponential backoff with a cap, ±jitter to keep many nodes'
//! retries from aligning. Permanent failures are never retried.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use strandgraph_types::PersistRetryConfig;

use crate::error::Result;

/// Runs `operation` until it succeeds or fails permanently.
///
/// Transient failures back off exponentially from the policy's base up to
/// its cap, jittered by ±`policy.jitter`. There is no attempt bound: the
/// durable journal is the source of truth, so giving up is not an option
/// short of a permanent failure.
///
/// # Errors
///
/// Returns the underlying error only if it is not retryable.
pub async fn retry_transient_forever<T, F, Fut>(
    policy: &PersistRetryConfig,
    label: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u64 = 0;
    let mut backoff = policy.base_backoff();

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(label, attempts = attempt + 1, "write succeeded after retry");
                }
                return Ok(value);
            },
            Err(err) if err.is_retryable() => {
                attempt += 1;
                let jittered = apply_jitter(backoff, policy.jitter);
                tracing::warn!(
                    label,
                    attempt,
                    backoff_ms = jittered.as_millis() as u64,
                    error = %err,
                    "transient write failure, retrying"
                );
                tokio::time::sleep(jittered).await;
                backoff = std::cmp::min(
                    Duration::from_nanos(
                        (backoff.as_nanos() as f64 * policy.multiplier) as u64,
                    ),
                    policy.max_backoff(),
                );
            },
            Err(err) => {
                tracing::error!(label, error = %err, "permanent write failure, not retrying");
                return Err(err);
            },
        }
    }
}

/// Apply jitter to a duration.
///
/// Jitter adds randomness in the range `[dur * (1 - factor), dur * (1 + factor)]`
/// so simultaneous retries across nodes spread out instead of hammering the
/// backend in lockstep.
fn apply_jitter(dur: Duration, factor: f64) -> Duration {
    if factor <= 0.0 {
        return dur;
    }

    let factor = factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();

    let base_nanos = dur.as_nanos() as f64;
    let min_nanos = base_nanos * (1.0 - factor);
    let max_nanos = base_nanos * (1.0 + factor);

    let jittered_nanos = rng.random_range(min_nanos..=max_nanos);
    Duration::from_nanos(jittered_nanos as u64)
}
