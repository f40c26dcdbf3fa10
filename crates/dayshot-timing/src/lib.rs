#![warn(missing_docs)]
//! # dayshot-timing
//!
//! ## Purpose
//! Provides the cancellable waiting primitives used by the run coordinator.
//!
//! ## Responsibilities
//! - Share one cancellation signal between the controlling thread and the
//!   run worker.
//! - Count down with per-second progress while polling the signal.
//! - Sleep cancellably for retry delays and scheduled starts.
//!
//! ## Data flow
//! The coordinator resets a [`CancellationToken`] when a run starts, passes
//! it to every [`Timer`] call, and `stop` requests cancel it from the
//! controlling thread.
//!
//! ## Error model
//! Waiting never fails; every primitive reports `true` when it ran to
//! completion and `false` when the token was cancelled first.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{NaiveDateTime, TimeDelta};

/// Maximum time between two cancellation checks during a countdown.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Step used while waiting for a scheduled start time.
pub const SCHEDULE_STEP: Duration = Duration::from_secs(1);

/// Cooperative cancellation signal shared by clones.
///
/// Waiting uses a condition variable, so a cancel wakes every waiter
/// immediately instead of at the next poll.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

#[derive(Debug, Default)]
struct TokenInner {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancellationToken {
    /// Creates a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the signal and wakes all waiters.
    pub fn cancel(&self) {
        *self.flag() = true;
        self.inner.signal.notify_all();
    }

    /// Clears the signal for the next run.
    pub fn reset(&self) {
        *self.flag() = false;
    }

    /// Returns `true` once [`cancel`](Self::cancel) was called.
    pub fn is_cancelled(&self) -> bool {
        *self.flag()
    }

    /// Blocks for at most `timeout`.
    ///
    /// Returns `true` when the token is (or becomes) cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = self.flag();
        let (guard, _) = self
            .inner
            .signal
            .wait_timeout_while(guard, timeout, |cancelled| !*cancelled)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }

    fn flag(&self) -> MutexGuard<'_, bool> {
        self.inner
            .cancelled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Waiting strategy used by the coordinator.
pub trait Timer: Send + Sync {
    /// Counts down `seconds`, calling `on_tick` with the remaining whole
    /// seconds each time that value changes.
    ///
    /// Returns `false` when interrupted by `token`.
    fn countdown(
        &self,
        seconds: u64,
        label: &str,
        token: &CancellationToken,
        on_tick: &mut dyn FnMut(u64),
    ) -> bool;

    /// Sleeps for `duration` unless cancelled. Returns `false` when cancelled.
    fn pause(&self, duration: Duration, token: &CancellationToken) -> bool;
}

/// Real-time [`Timer`] polling the token at a fixed granularity.
#[derive(Debug, Clone, Copy)]
pub struct PollingTimer {
    poll: Duration,
}

impl PollingTimer {
    /// Creates a timer polling every `poll` (clamped to [`POLL_INTERVAL`]).
    pub fn new(poll: Duration) -> Self {
        Self {
            poll: poll.min(POLL_INTERVAL).max(Duration::from_millis(1)),
        }
    }
}

impl Default for PollingTimer {
    fn default() -> Self {
        Self::new(POLL_INTERVAL)
    }
}

impl Timer for PollingTimer {
    fn countdown(
        &self,
        seconds: u64,
        _label: &str,
        token: &CancellationToken,
        on_tick: &mut dyn FnMut(u64),
    ) -> bool {
        countdown(Duration::from_secs(seconds), self.poll, token, on_tick)
    }

    fn pause(&self, duration: Duration, token: &CancellationToken) -> bool {
        !token.wait_timeout(duration)
    }
}

/// Counts down `total`, checking `token` at least every `poll`.
///
/// `on_tick` receives the remaining time rounded up to whole seconds,
/// once per distinct value.
pub fn countdown(
    total: Duration,
    poll: Duration,
    token: &CancellationToken,
    on_tick: &mut dyn FnMut(u64),
) -> bool {
    let deadline = Instant::now() + total;
    let mut last_reported = None;

    loop {
        if token.is_cancelled() {
            return false;
        }

        let now = Instant::now();
        if now >= deadline {
            return true;
        }

        let remaining = deadline - now;
        let whole_seconds = remaining.as_millis().div_ceil(1_000) as u64;
        if last_reported != Some(whole_seconds) {
            on_tick(whole_seconds);
            last_reported = Some(whole_seconds);
        }

        if token.wait_timeout(remaining.min(poll)) {
            return false;
        }
    }
}

/// Waits until `now()` reaches `target`, in [`SCHEDULE_STEP`] increments.
///
/// `on_remaining` is called before every step with the time left. Returns
/// `false` when cancelled first.
pub fn wait_until(
    timer: &dyn Timer,
    target: NaiveDateTime,
    now: &dyn Fn() -> NaiveDateTime,
    token: &CancellationToken,
    on_remaining: &mut dyn FnMut(TimeDelta),
) -> bool {
    loop {
        if token.is_cancelled() {
            return false;
        }

        let remaining = target - now();
        if remaining <= TimeDelta::zero() {
            return true;
        }

        on_remaining(remaining);
        let step = remaining
            .to_std()
            .map(|left| left.min(SCHEDULE_STEP))
            .unwrap_or(SCHEDULE_STEP);
        if !timer.pause(step, token) {
            return false;
        }
    }
}
