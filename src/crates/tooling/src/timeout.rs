//! Timeout utilities
//!
//! Bounded awaiting for operations that talk to external services. The tool
//! orchestration loop wraps every handler invocation with [`with_timeout`]
//! so a stuck tool can never stall a graph.

use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// The wrapped operation did not finish inside its budget.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("operation timed out after {0:?}")]
pub struct Elapsed(pub Duration);

/// Await `future` for at most `duration`.
pub async fn with_timeout<F, T>(duration: Duration, future: F) -> Result<T, Elapsed>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(duration, future)
        .await
        .map_err(|_| Elapsed(duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fast_operations_pass_through() {
        let result = with_timeout(Duration::from_millis(50), async { 7 }).await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn slow_operations_report_elapsed() {
        let result = with_timeout(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            7
        })
        .await;
        assert_eq!(result, Err(Elapsed(Duration::from_millis(10))));
    }
}
