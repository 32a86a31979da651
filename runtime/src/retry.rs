//! Fixed-interval retry for background recovery loops.
//!
//! Recovery loops (reconnecting, re-registering consumers) retry forever at a
//! fixed interval until they succeed, hit an error that retrying cannot fix, or
//! are cancelled. The wait between attempts races against a cancellation future,
//! so a shutdown is observed within one interval at most.
//!
//! # Example
//!
//! ```rust
//! use resilient_rabbit_runtime::retry::{RetryOutcome, retry_at_interval};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let outcome = retry_at_interval(
//!     "warm-up",
//!     Duration::from_millis(10),
//!     || async { Ok::<_, String>(42) },
//!     |_err: &String| true,
//!     std::future::pending::<()>,
//! )
//! .await;
//!
//! assert_eq!(outcome, RetryOutcome::Succeeded(42));
//! # }
//! ```

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// How a retry loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T, E> {
    /// The operation succeeded
    Succeeded(T),
    /// The operation failed with an error that is not worth retrying
    Failed(E),
    /// The cancellation future resolved while waiting for the next attempt
    Cancelled,
}

/// Retry `operation` every `interval` until it succeeds.
///
/// - `is_retryable` decides whether an error ends the loop with
///   [`RetryOutcome::Failed`].
/// - `cancelled` is called once per wait; if the future it returns resolves
///   before the interval elapses, the loop ends with [`RetryOutcome::Cancelled`].
///
/// `what` names the operation in log events.
pub async fn retry_at_interval<F, Fut, T, E, P, C, CFut>(
    what: &str,
    interval: Duration,
    mut operation: F,
    is_retryable: P,
    mut cancelled: C,
) -> RetryOutcome<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&E) -> bool,
    C: FnMut() -> CFut,
    CFut: Future<Output = ()>,
{
    let mut attempt: u64 = 0;

    loop {
        attempt += 1;
        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    tracing::info!(what, attempt, "Operation succeeded after retry");
                }
                return RetryOutcome::Succeeded(result);
            }
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(what, attempt, error = %err, "Error is not retryable, giving up");
                    return RetryOutcome::Failed(err);
                }

                tracing::info!(
                    what,
                    attempt,
                    delay_ms = interval.as_millis(),
                    error = %err,
                    "Operation failed, next attempt scheduled"
                );

                tokio::select! {
                    () = sleep(interval) => {}
                    () = cancelled() => {
                        tracing::debug!(what, attempt, "Retry loop cancelled");
                        return RetryOutcome::Cancelled;
                    }
                }
            }
        }
    }
}
