//! Retry utilities: backoff builders and the optimistic-retry loop.
//!
//! Uses `backon` for exponential backoff with jitter. Read-modify-write
//! operations that lose a version race are re-run from scratch with fresh
//! reads until they succeed, fail fatally, or exhaust the backoff.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use backon::{BackoffBuilder, ExponentialBuilder};
use tracing::{debug, error, warn};

use crate::config::LedgerLimits;

/// Backoff for transactional ledger writes (version conflicts).
///
/// Delays and attempt cap come from `limits`; jitter is always enabled.
pub fn transaction_backoff(limits: &LedgerLimits) -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(limits.retry_min_delay_ms))
        .with_max_delay(Duration::from_millis(limits.retry_max_delay_ms))
        .with_max_times(limits.purchase_max_retries as usize)
        .with_jitter()
}

/// Result of a single attempt.
#[derive(Debug)]
pub enum RetryOutcome<S, F> {
    Success(S),
    /// Lost a race; try again with fresh state.
    Retryable(F),
    /// Will not succeed on retry.
    Fatal(F),
}

/// Why a retried operation gave up.
#[derive(Debug)]
pub enum RetryFailure<F> {
    Fatal(F),
    Exhausted { attempts: u32, last: F },
}

impl<F: fmt::Display> fmt::Display for RetryFailure<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RetryFailure::Fatal(e) => write!(f, "{}", e),
            RetryFailure::Exhausted { attempts, last } => {
                write!(f, "gave up after {} attempts: {}", attempts, last)
            }
        }
    }
}

/// An operation that can be re-run after a retryable failure.
#[async_trait]
pub trait RetryableOperation: Send {
    type Success: Send;
    type Failure: Send + fmt::Display;

    /// Name used in log lines.
    fn name(&self) -> &str;

    /// One complete attempt, including any reads it depends on.
    async fn try_execute(&mut self) -> RetryOutcome<Self::Success, Self::Failure>;

    /// Hook run between a retryable failure and the next attempt.
    async fn prepare_for_retry(&mut self, _failure: &Self::Failure) -> Result<(), Self::Failure> {
        Ok(())
    }
}

/// Run `operation` until it succeeds, fails fatally, or the backoff runs out.
///
/// The backoff's `max_times` bounds the number of retries, so the operation
/// runs at most `max_times + 1` times.
pub async fn run_with_retry<O: RetryableOperation>(
    mut operation: O,
    backoff: ExponentialBuilder,
) -> Result<O::Success, RetryFailure<O::Failure>> {
    let mut delays = backoff.build();
    let mut attempts: u32 = 0;

    loop {
        attempts += 1;
        let failure = match operation.try_execute().await {
            RetryOutcome::Success(value) => {
                if attempts > 1 {
                    debug!(operation = operation.name(), attempts, "Succeeded after retry");
                }
                return Ok(value);
            }
            RetryOutcome::Fatal(failure) => return Err(RetryFailure::Fatal(failure)),
            RetryOutcome::Retryable(failure) => failure,
        };

        let Some(delay) = delays.next() else {
            error!(
                operation = operation.name(),
                attempts,
                error = %failure,
                "Retries exhausted"
            );
            return Err(RetryFailure::Exhausted {
                attempts,
                last: failure,
            });
        };

        warn!(
            operation = operation.name(),
            attempt = attempts,
            delay_ms = delay.as_millis() as u64,
            error = %failure,
            "Retryable failure, backing off"
        );
        if let Err(fatal) = operation.prepare_for_retry(&failure).await {
            return Err(RetryFailure::Fatal(fatal));
        }
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
mod tests;
