//! Scoped ownership of a changed system date.

use std::thread;
use std::time::Duration;

use chrono::NaiveDate;
use dayshot_system::ClockController;
use tracing::{error, info, warn};

/// How the original date was put back after a cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreStatus {
    /// The cycle never touched the date.
    NotNeeded,
    /// Restored on the first attempt.
    Restored,
    /// Restored on the second attempt.
    RestoredAfterRetry,
    /// Both attempts failed; the clock may still show a simulated date.
    Failed(String),
}

impl RestoreStatus {
    /// Returns `true` unless restoration failed.
    pub fn is_restored(&self) -> bool {
        !matches!(self, RestoreStatus::Failed(_))
    }
}

/// Holds the initial date of a cycle and restores it when released or
/// dropped, including during unwinding.
pub(crate) struct DateOverride<'a> {
    clock: &'a dyn ClockController,
    initial: NaiveDate,
    retry_delay: Duration,
    released: bool,
}

impl<'a> DateOverride<'a> {
    pub(crate) fn acquire(
        clock: &'a dyn ClockController,
        initial: NaiveDate,
        retry_delay: Duration,
    ) -> Self {
        Self {
            clock,
            initial,
            retry_delay,
            released: false,
        }
    }

    pub(crate) fn initial_date(&self) -> NaiveDate {
        self.initial
    }

    /// Restores the initial date now and reports how it went.
    pub(crate) fn release(mut self) -> RestoreStatus {
        self.released = true;
        restore_date(self.clock, self.initial, self.retry_delay)
    }
}

impl Drop for DateOverride<'_> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        warn!(date = %self.initial, "restoring date from unwinding cycle");
        restore_date(self.clock, self.initial, self.retry_delay);
    }
}

fn restore_date(
    clock: &dyn ClockController,
    initial: NaiveDate,
    retry_delay: Duration,
) -> RestoreStatus {
    let first = match clock.set_date(initial) {
        Ok(()) => {
            info!(date = %initial, "initial date restored");
            return RestoreStatus::Restored;
        }
        Err(error) => error,
    };

    warn!(date = %initial, error = %first, "date restore failed, retrying once");
    thread::sleep(retry_delay);

    match clock.set_date(initial) {
        Ok(()) => {
            info!(date = %initial, "initial date restored on retry");
            RestoreStatus::RestoredAfterRetry
        }
        Err(second) => {
            error!(
                date = %initial,
                error = %second,
                "date restore failed twice; set the system date manually"
            );
            RestoreStatus::Failed(second.to_string())
        }
    }
}
