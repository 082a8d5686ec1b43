//! Retry backoff and the single pending protocol timer.
//!
//! The scheduler owns at most one armed timer. Cancelling bumps a shared
//! generation counter, so a timer whose deadline has already elapsed (or
//! whose wakeup is racing the cancel on another thread) is discarded when
//! the protocol loop gets to it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::{BackoffConfig, BackoffGrowth};

/// What to do when the timer fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Send a new handshake
    Handshake,
    /// Send the next connect
    Connect,
}

#[derive(Debug, Clone, Copy)]
struct Armed {
    deadline: Instant,
    action: RetryAction,
    generation: u64,
}

/// Cancels the scheduler's pending timer from any thread.
#[derive(Debug, Clone)]
pub struct BackoffHandle {
    generation: Arc<AtomicU64>,
}

impl BackoffHandle {
    /// Invalidate whatever timer is currently armed.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Computes retry delays and holds the pending protocol timer
#[derive(Debug)]
pub struct BackoffScheduler {
    config: BackoffConfig,
    current: Option<Duration>,
    armed: Option<Armed>,
    generation: Arc<AtomicU64>,
}

impl BackoffScheduler {
    /// Create a scheduler from configuration
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: None,
            armed: None,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Handle for cancelling from other threads
    pub fn handle(&self) -> BackoffHandle {
        BackoffHandle {
            generation: self.generation.clone(),
        }
    }

    /// Delay before the next retry; grows on every call up to the ceiling.
    pub fn next_delay(&mut self) -> Duration {
        let base = Duration::from_millis(self.config.base_ms);
        let max = Duration::from_millis(self.config.max_ms);

        let next = match self.current {
            None => base,
            Some(previous) => match self.config.growth {
                BackoffGrowth::Exponential { factor } => previous.saturating_mul(factor.max(1)),
                BackoffGrowth::Linear { increment_ms } => {
                    previous.saturating_add(Duration::from_millis(increment_ms))
                },
            },
        }
        .min(max);

        self.current = Some(next);
        next
    }

    /// Back to the base delay after a successful cycle
    pub fn reset(&mut self) {
        self.current = None;
    }

    /// Arm a retry after the next backoff delay plus `interval`.
    ///
    /// Returns the total delay.
    pub fn schedule_retry(
        &mut self,
        now: Instant,
        interval: Duration,
        action: RetryAction,
    ) -> Duration {
        let delay = self.next_delay().saturating_add(interval);
        self.schedule_after(now, delay, action);
        delay
    }

    /// Arm the timer for a fixed delay, without touching the backoff.
    pub fn schedule_after(&mut self, now: Instant, delay: Duration, action: RetryAction) {
        self.armed = Some(Armed {
            deadline: now + delay,
            action,
            generation: self.generation.load(Ordering::SeqCst),
        });
    }

    /// Deadline of the armed timer, if it is still current
    pub fn deadline(&self) -> Option<Instant> {
        self.current_armed().map(|armed| armed.deadline)
    }

    /// Whether a current timer is armed
    pub fn is_pending(&self) -> bool {
        self.current_armed().is_some()
    }

    /// Take the armed action if its deadline has passed.
    ///
    /// A timer invalidated by [`cancel`](Self::cancel) is dropped and never
    /// returned.
    pub fn take_due(&mut self, now: Instant) -> Option<RetryAction> {
        let armed = self.armed?;
        if armed.generation != self.generation.load(Ordering::SeqCst) {
            self.armed = None;
            return None;
        }
        if armed.deadline > now {
            return None;
        }
        self.armed = None;
        Some(armed.action)
    }

    /// Abort the pending timer
    pub fn cancel(&mut self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.armed = None;
    }

    fn current_armed(&self) -> Option<&Armed> {
        self.armed
            .as_ref()
            .filter(|armed| armed.generation == self.generation.load(Ordering::SeqCst))
    }
}
