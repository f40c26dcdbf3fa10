#![warn(missing_docs)]
//! # dayshot-ui
//!
//! ## Purpose
//! Defines the front-end facing side of a run: what the coordinator reports
//! and what it may ask.
//!
//! ## Responsibilities
//! - Declare the reporting ([`RunReporter`]) and yes/no ([`Escalation`])
//!   interfaces the coordinator calls from its worker thread.
//! - Keep the latest run status in a thread-safe [`StatusBoard`] for polling
//!   front-ends.
//! - Project status into a single display line.
//!
//! ## Data flow
//! Worker thread -> [`RunReporter`] calls -> [`StatusBoard`] mutates
//! [`UiStatus`] -> front-end polls [`StatusBoard::snapshot`] and renders
//! [`project_status`].
//!
//! ## Ownership and lifetimes
//! `UiStatus` owns all of its strings so snapshots can cross threads freely.
//!
//! ## Error model
//! Reporting never fails. A poisoned board lock is recovered, since status
//! text carries no invariants worth aborting for.

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Coarse phase of the run shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunStage {
    /// No run has started.
    #[default]
    Idle,
    /// Waiting for a scheduled start time.
    Waiting,
    /// Counting down to the next capture.
    Countdown,
    /// Setting the date, focusing and capturing.
    Capturing,
    /// A stop was requested and the worker is unwinding.
    Stopping,
    /// All slots ran.
    Completed,
    /// Stopped on request.
    Stopped,
    /// Ended by a fatal error.
    Failed,
}

impl RunStage {
    /// Returns `true` once the run has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStage::Completed | RunStage::Stopped | RunStage::Failed
        )
    }

    /// Short lowercase label.
    pub fn label(&self) -> &'static str {
        match self {
            RunStage::Idle => "idle",
            RunStage::Waiting => "waiting",
            RunStage::Countdown => "countdown",
            RunStage::Capturing => "capturing",
            RunStage::Stopping => "stopping",
            RunStage::Completed => "completed",
            RunStage::Stopped => "stopped",
            RunStage::Failed => "failed",
        }
    }
}

/// Latest countdown reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountdownStatus {
    /// What is being counted down to.
    pub label: String,
    /// Whole seconds left.
    pub remaining_secs: u64,
}

/// Snapshot of everything a front-end renders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UiStatus {
    /// App version string sourced from root `VERSION`.
    pub version: String,
    /// Current phase.
    pub stage: RunStage,
    /// Last status text.
    pub text: String,
    /// Progress numerator (last successfully captured slot, one-based).
    pub current: u32,
    /// Progress denominator (slot count).
    pub total: u32,
    /// Countdown in progress, if any.
    pub countdown: Option<CountdownStatus>,
    /// Last failed attempt, formatted for display.
    pub last_error: Option<String>,
}

impl UiStatus {
    /// Creates the idle status.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            stage: RunStage::Idle,
            text: "Ready".to_string(),
            current: 0,
            total: 0,
            countdown: None,
            last_error: None,
        }
    }
}

/// Receives run events from the worker thread.
pub trait RunReporter: Send + Sync {
    /// Phase change or free-form status text.
    fn status(&self, stage: RunStage, text: &str);

    /// Slot `current` of `total` was captured.
    fn progress(&self, current: u32, total: u32);

    /// Countdown tick.
    fn countdown(&self, label: &str, remaining_secs: u64);

    /// A capture attempt for `slot` failed.
    fn attempt_failed(&self, slot: u32, attempt: u32, reason: &str);
}

/// Asks the user a yes/no question and blocks for the answer.
pub trait Escalation: Send + Sync {
    /// Returns `true` for "yes".
    fn confirm(&self, question: &str) -> bool;
}

/// Escalation that always gives the same answer.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Escalation for FixedAnswer {
    fn confirm(&self, _question: &str) -> bool {
        self.0
    }
}

/// Thread-safe [`RunReporter`] that keeps the latest [`UiStatus`].
#[derive(Debug)]
pub struct StatusBoard {
    status: Mutex<UiStatus>,
}

impl StatusBoard {
    /// Creates an idle board.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            status: Mutex::new(UiStatus::new(version)),
        }
    }

    /// Copy of the current status.
    pub fn snapshot(&self) -> UiStatus {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, UiStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RunReporter for StatusBoard {
    fn status(&self, stage: RunStage, text: &str) {
        let mut status = self.lock();
        if stage != RunStage::Countdown {
            status.countdown = None;
        }
        status.stage = stage;
        status.text = text.to_string();
    }

    fn progress(&self, current: u32, total: u32) {
        let mut status = self.lock();
        status.current = current;
        status.total = total;
        status.text = format!("Progress: {current}/{total}");
    }

    fn countdown(&self, label: &str, remaining_secs: u64) {
        let mut status = self.lock();
        if !status.stage.is_terminal() {
            status.stage = RunStage::Countdown;
        }
        status.text = format!("{label} {remaining_secs}s");
        status.countdown = Some(CountdownStatus {
            label: label.to_string(),
            remaining_secs,
        });
    }

    fn attempt_failed(&self, slot: u32, attempt: u32, reason: &str) {
        self.lock().last_error = Some(format!("slot {slot}, attempt {attempt}: {reason}"));
    }
}

/// Integer completion percentage, clamped to 100.
pub fn progress_percent(current: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    ((u64::from(current.min(total)) * 100) / u64::from(total)) as u8
}

/// Formats seconds as `MM:SS`, or `HH:MM:SS` from one hour up.
pub fn format_remaining(total_secs: u64) -> String {
    let hours = total_secs / 3_600;
    let minutes = (total_secs % 3_600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{minutes:02}:{seconds:02}")
    }
}

/// Flattens `status` into one display line.
pub fn project_status(status: &UiStatus) -> String {
    let mut line = format!("[{}] {}", status.stage.label(), status.text);
    if status.total > 0 {
        line.push_str(&format!(
            " | {}/{} ({}%)",
            status.current,
            status.total,
            progress_percent(status.current, status.total)
        ));
    }
    if let Some(countdown) = &status.countdown
        && status.stage == RunStage::Countdown
    {
        line.push_str(&format!(
            " | {} {}",
            countdown.label,
            format_remaining(countdown.remaining_secs)
        ));
    }
    if let Some(error) = &status.last_error {
        line.push_str(&format!(" | last error: {error}"));
    }
    line
}

#[cfg(test)]
mod tests {
    //! Unit tests for status projection.

    use super::*;

    #[test]
    fn board_tracks_progress_and_countdown() {
        let board = StatusBoard::new("v0.1.0");
        board.status(RunStage::Capturing, "Capturing slot 1");
        board.progress(1, 4);
        board.countdown("Next capture in", 899);

        let status = board.snapshot();
        assert_eq!(status.stage, RunStage::Countdown);
        assert_eq!((status.current, status.total), (1, 4));
        assert_eq!(
            project_status(&status),
            "[countdown] Next capture in 899s | 1/4 (25%) | Next capture in 14:59"
        );
    }

    #[test]
    fn terminal_status_clears_countdown_and_keeps_progress() {
        let board = StatusBoard::new("v0.1.0");
        board.progress(2, 5);
        board.countdown("Next capture in", 10);
        board.attempt_failed(2, 1, "window not found");
        board.status(RunStage::Stopped, "stopped");

        let status = board.snapshot();
        assert!(status.stage.is_terminal());
        assert_eq!(status.countdown, None);
        assert_eq!(status.current, 2);
        assert_eq!(
            status.last_error.as_deref(),
            Some("slot 2, attempt 1: window not found")
        );
    }

    #[test]
    fn formats_percent_and_remaining_time() {
        assert_eq!(progress_percent(0, 0), 0);
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(9, 3), 100);
        assert_eq!(format_remaining(65), "01:05");
        assert_eq!(format_remaining(3_725), "01:02:05");
    }

    #[test]
    fn fixed_answer_is_constant() {
        assert!(FixedAnswer(true).confirm("Continue?"));
        assert!(!FixedAnswer(false).confirm("Continue?"));
    }
}
