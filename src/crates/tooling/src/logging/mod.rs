//! Logging utilities
//!
//! Helpers for structured logging with tracing.

use std::time::Instant;
use tracing::debug;

/// Log execution time of a future at debug level.
///
/// # Example
///
/// ```rust,ignore
/// use tooling::logging::timed;
///
/// let results = timed("graph execution", executor.execute()).await;
/// ```
pub async fn timed<F, T>(name: &str, future: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    debug!("Starting: {}", name);

    let result = future.await;

    debug!("Completed: {} in {:?}", name, start.elapsed());
    result
}
