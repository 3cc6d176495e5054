//! Rate limiting utilities
//!
//! Sliding-window rate limiting for outbound provider calls (market data,
//! web search). The limiter tracks acquisition timestamps and drops entries
//! older than the window on every operation, so at any window-length span at
//! most `max_per_window` acquisitions succeed.

use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Sliding window rate limiter
///
/// # Example
///
/// ```rust,ignore
/// use tooling::rate_limit::SlidingWindowLimiter;
/// use std::time::Duration;
///
/// // Allow 4 calls per second, waiting when the window is full.
/// let limiter = SlidingWindowLimiter::new(4, Duration::from_secs(1));
/// limiter.acquire().await;
/// ```
pub struct SlidingWindowLimiter {
    state: Mutex<WindowState>,
    max_per_window: usize,
    window: Duration,
}

struct WindowState {
    /// Timestamps of acquisitions inside the current window.
    acquired: Vec<Instant>,
}

impl SlidingWindowLimiter {
    pub fn new(max_per_window: usize, window: Duration) -> Self {
        Self {
            state: Mutex::new(WindowState {
                acquired: Vec::new(),
            }),
            max_per_window,
            window,
        }
    }

    /// Try to take a slot without waiting.
    pub async fn check(&self) -> bool {
        let mut state = self.state.lock().await;
        self.prune(&mut state);
        if state.acquired.len() < self.max_per_window {
            state.acquired.push(Instant::now());
            true
        } else {
            false
        }
    }

    /// Take a slot, suspending the caller until one frees up.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                self.prune(&mut state);
                if state.acquired.len() < self.max_per_window {
                    state.acquired.push(Instant::now());
                    return;
                }
                // Sleep until the oldest entry ages out of the window.
                let oldest = state.acquired[0];
                self.window.saturating_sub(oldest.elapsed())
            };
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Number of acquisitions inside the current window.
    pub async fn count(&self) -> usize {
        let mut state = self.state.lock().await;
        self.prune(&mut state);
        state.acquired.len()
    }

    pub async fn reset(&self) {
        self.state.lock().await.acquired.clear();
    }

    fn prune(&self, state: &mut WindowState) {
        let window = self.window;
        state.acquired.retain(|t| t.elapsed() < window);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allows_up_to_limit_then_denies() {
        let limiter = SlidingWindowLimiter::new(3, Duration::from_millis(100));
        assert!(limiter.check().await);
        assert!(limiter.check().await);
        assert!(limiter.check().await);
        assert!(!limiter.check().await);
        assert_eq!(limiter.count().await, 3);
    }

    #[tokio::test]
    async fn entries_expire_out_of_the_window() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_millis(50));
        assert!(limiter.check().await);
        assert!(limiter.check().await);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(limiter.check().await);
        assert_eq!(limiter.count().await, 1);
    }

    #[tokio::test]
    async fn acquire_blocks_until_slot_frees() {
        let limiter = SlidingWindowLimiter::new(1, Duration::from_millis(50));
        limiter.acquire().await;
        let start = Instant::now();
        limiter.acquire().await;
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[tokio::test]
    async fn window_invariant_under_load() {
        let limiter = std::sync::Arc::new(SlidingWindowLimiter::new(5, Duration::from_millis(80)));
        let mut handles = Vec::new();
        for _ in 0..12 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move {
                limiter.acquire().await;
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        // The window can never report more than the cap.
        assert!(limiter.count().await <= 5);
    }

    #[tokio::test]
    async fn reset_clears_the_window() {
        let limiter = SlidingWindowLimiter::new(2, Duration::from_secs(1));
        limiter.check().await;
        limiter.check().await;
        limiter.reset().await;
        assert_eq!(limiter.count().await, 0);
        assert!(limiter.check().await);
    }
}
