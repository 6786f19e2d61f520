//! Admission gate for upstream calls.
//!
//! One [`RateLimiter`] is shared by every request an agent process serves.
//! It caps concurrent upstream calls, spaces consecutive calls by a minimum
//! interval, and enforces a per-window call budget.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{self, Instant};

use crate::config::ExecutorConfig;

/// Sliding call budget state: the grants still inside the window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RateWindow {
    pub grants: VecDeque<Instant>,
    pub last_request_time: Option<Instant>,
}

impl RateWindow {
    /// Calls granted within the current window.
    pub fn call_count(&self) -> usize {
        self.grants.len()
    }

    /// Oldest grant still counted against the budget.
    pub fn window_start(&self) -> Option<Instant> {
        self.grants.front().copied()
    }

    fn prune(&mut self, now: Instant, window_len: Duration) {
        while self
            .grants
            .front()
            .is_some_and(|granted| now.duration_since(*granted) >= window_len)
        {
            self.grants.pop_front();
        }
    }
}

/// Proof of admission; the concurrency slot is released on drop.
#[derive(Debug)]
pub struct RatePermit {
    _permit: Option<OwnedSemaphorePermit>,
}

/// Concurrency cap, minimum spacing, and per-window budget in one gate.
#[derive(Debug)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    window: Mutex<RateWindow>,
    min_interval: Duration,
    max_calls_per_window: u32,
    window_len: Duration,
}

impl RateLimiter {
    /// `max_calls_per_minute == 0` disables the call budget.
    pub fn new(max_concurrent: usize, min_interval: Duration, max_calls_per_minute: u32) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            window: Mutex::new(RateWindow::default()),
            min_interval,
            max_calls_per_window: max_calls_per_minute,
            window_len: Duration::from_secs(60),
        }
    }

    pub fn from_config(config: &ExecutorConfig) -> Self {
        Self::new(
            config.max_concurrent_requests,
            config.min_request_interval,
            config.max_calls_per_minute,
        )
        .with_window(config.rate_window)
    }

    /// Override the budget window length (60 seconds by default).
    pub fn with_window(mut self, window_len: Duration) -> Self {
        self.window_len = window_len;
        self
    }

    /// Wait until a call may proceed.
    ///
    /// Callers queue on the concurrency cap in FIFO order, then on the shared
    /// window state. The budget is a sliding window: a call is granted only
    /// when fewer than the budget were granted in the preceding window length.
    /// Dropping the returned future releases anything acquired.
    pub async fn acquire(&self) -> RatePermit {
        // The semaphore is never closed, so acquisition only fails if that changes.
        let permit = self.semaphore.clone().acquire_owned().await.ok();

        let mut window = self.window.lock().await;
        loop {
            let now = Instant::now();
            window.prune(now, self.window_len);

            if self.max_calls_per_window > 0
                && window.call_count() >= self.max_calls_per_window as usize
            {
                if let Some(oldest) = window.window_start() {
                    let resume_at = oldest + self.window_len;
                    tracing::debug!(
                        call_count = window.call_count(),
                        wait_ms = resume_at.duration_since(now).as_millis() as u64,
                        "call budget exhausted, waiting for the oldest call to age out"
                    );
                    time::sleep_until(resume_at).await;
                    continue;
                }
            }

            if let Some(last) = window.last_request_time {
                let ready_at = last + self.min_interval;
                if now < ready_at {
                    time::sleep_until(ready_at).await;
                    continue;
                }
            }

            window.grants.push_back(now);
            window.last_request_time = Some(now);
            break;
        }

        RatePermit { _permit: permit }
    }

    /// Snapshot of the current window state.
    pub async fn window(&self) -> RateWindow {
        let mut window = self.window.lock().await;
        window.prune(Instant::now(), self.window_len);
        window.clone()
    }

    /// Free concurrency slots right now.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}
