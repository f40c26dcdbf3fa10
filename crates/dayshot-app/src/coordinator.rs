//! The run coordinator and its background worker.
//!
//! One [`RunCoordinator`] owns at most one active run. The worker thread
//! executes the schedule and the slot loop; the controlling thread only
//! starts, stops, polls and waits.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use dayshot_capture::ScreenCapture;
use dayshot_core::{RunParameters, SlotResult, StartMode, simulated_date};
use dayshot_system::{ClockController, ClockError, WindowFocuser, focus_window};
use dayshot_timing::{CancellationToken, Timer, wait_until};
use dayshot_ui::{Escalation, RunReporter, RunStage, format_remaining};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::AppError;
use crate::config::{RunSettings, capture_enabled_from_env};
use crate::restore::{DateOverride, RestoreStatus};

/// Name of the background worker thread.
pub const WORKER_THREAD_NAME: &str = "dayshot-run-worker";

const FIRST_CAPTURE_LABEL: &str = "First capture in";
const NEXT_CAPTURE_LABEL: &str = "Next capture in";

/// Collaborators a run is executed against.
pub struct RunDependencies {
    /// System date access.
    pub clock: Arc<dyn ClockController>,
    /// Foreground window control.
    pub focuser: Arc<dyn WindowFocuser>,
    /// Screenshot writer.
    pub capture: Arc<dyn ScreenCapture>,
    /// Countdown and delay strategy.
    pub timer: Arc<dyn Timer>,
    /// Status sink.
    pub reporter: Arc<dyn RunReporter>,
    /// Yes/no decision after exhausted capture retries.
    pub escalation: Arc<dyn Escalation>,
    /// Timing and retry knobs.
    pub settings: RunSettings,
}

/// Why a run ended early.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunFailure {
    /// The clock refused a simulated date.
    #[error("could not set the system date to {date} for slot {slot}: {source}")]
    DateChange {
        /// Zero-based slot index.
        slot: u32,
        /// Requested date.
        date: NaiveDate,
        /// Clock error.
        source: ClockError,
    },
    /// Capture kept failing and the user chose not to continue.
    #[error("capture failed {attempts} times at slot {slot} and the run was not continued")]
    CaptureDeclined {
        /// Zero-based slot index.
        slot: u32,
        /// Attempts made.
        attempts: u32,
    },
    /// The simulated date left the representable calendar.
    #[error("simulated date for slot {slot} is out of range")]
    DateOverflow {
        /// Zero-based slot index.
        slot: u32,
    },
    /// The slot loop panicked.
    #[error("run worker panicked")]
    Panicked,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every slot ran.
    Completed,
    /// Ended by a stop request.
    Stopped,
    /// Ended by a fatal error.
    Failed(RunFailure),
}

/// Final account of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// How the run ended.
    pub outcome: RunOutcome,
    /// Per-slot outcomes across all cycles, in order.
    pub slots: Vec<SlotResult>,
    /// Slots with a verified screenshot.
    pub captured: u32,
    /// Restoration result of the last cycle that ran.
    pub restore: RestoreStatus,
    /// Capture cycles started (more than one only for daily schedules).
    pub cycles: u32,
}

impl RunReport {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::Completed,
            slots: Vec::new(),
            captured: 0,
            restore: RestoreStatus::NotNeeded,
            cycles: 0,
        }
    }
}

/// Result of [`RunCoordinator::stop_run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// No run was active.
    NotRunning,
    /// The worker finished within the timeout.
    Stopped,
    /// The worker was still busy when the timeout elapsed; it keeps
    /// unwinding in the background.
    Abandoned,
}

/// Read-only view of the run state.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunSnapshot {
    /// A run is active.
    pub is_running: bool,
    /// A stop was requested for the active run.
    pub stop_requested: bool,
    /// Slot being processed.
    pub current_slot: Option<u32>,
    /// Date the active cycle restores to.
    pub initial_date: Option<NaiveDate>,
    /// Date last applied to the clock by the active cycle.
    pub simulated_date: Option<NaiveDate>,
    /// Capture cycles started so far.
    pub cycles: u32,
}

#[derive(Debug, Default)]
struct RunState {
    is_running: bool,
    stop_requested: bool,
    current_slot: Option<u32>,
    initial_date: Option<NaiveDate>,
    simulated_date: Option<NaiveDate>,
    cycles: u32,
    last_report: Option<RunReport>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<RunState>,
    finished: Condvar,
    token: CancellationToken,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the single active run.
pub struct RunCoordinator {
    deps: Arc<RunDependencies>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl RunCoordinator {
    /// Creates an idle coordinator.
    pub fn new(deps: RunDependencies) -> Self {
        Self {
            deps: Arc::new(deps),
            shared: Arc::new(Shared::default()),
            worker: Mutex::new(None),
        }
    }

    /// Starts a run in the background.
    ///
    /// # Errors
    /// - [`AppError::AlreadyRunning`] when a run is active.
    /// - [`AppError::CaptureDisabled`] when the kill switch is engaged.
    /// - [`AppError::InsufficientPrivileges`] when the date cannot be changed.
    /// - [`AppError::Spawn`] when the worker thread cannot be created.
    pub fn start_run(&self, params: RunParameters) -> Result<(), AppError> {
        let mut state = self.shared.lock();
        if state.is_running {
            warn!("start requested while a run is active; ignoring");
            return Err(AppError::AlreadyRunning);
        }
        if !capture_enabled_from_env() {
            warn!("start refused: capture disabled by kill switch");
            return Err(AppError::CaptureDisabled);
        }
        if !self.deps.clock.can_set_date() {
            error!("start refused: process may not change the system date");
            return Err(AppError::InsufficientPrivileges);
        }

        if let Some(previous) = self.take_worker() {
            let _ = previous.join();
        }

        *state = RunState {
            is_running: true,
            initial_date: Some(self.deps.clock.today()),
            ..RunState::default()
        };
        self.shared.token.reset();

        info!(
            hours = params.total_hours(),
            slots = params.slot_count(),
            interval_secs = params.interval_seconds(),
            target = %params.target(),
            start_mode = ?params.start_mode(),
            "run accepted"
        );

        let deps = Arc::clone(&self.deps);
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(WORKER_THREAD_NAME.to_string())
            .spawn(move || run_worker(&deps, &shared, params));

        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
                Ok(())
            }
            Err(error) => {
                *state = RunState::default();
                error!(%error, "failed to spawn run worker");
                Err(AppError::Spawn(error))
            }
        }
    }

    /// Requests the active run to stop and waits up to `timeout` for it.
    ///
    /// Cleanup, including date restoration, is left to the worker.
    pub fn stop_run(&self, timeout: Duration) -> StopOutcome {
        {
            let mut state = self.shared.lock();
            if !state.is_running {
                return StopOutcome::NotRunning;
            }
            state.stop_requested = true;
        }

        info!("stop requested");
        self.deps.reporter.status(RunStage::Stopping, "Stopping...");
        self.shared.token.cancel();

        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .finished
            .wait_timeout_while(state, timeout, |state| state.is_running)
            .unwrap_or_else(PoisonError::into_inner);

        if state.is_running {
            warn!(
                timeout_ms = timeout.as_millis() as u64,
                "run worker did not finish in time; continuing without it"
            );
            return StopOutcome::Abandoned;
        }

        drop(state);
        if let Some(handle) = self.take_worker() {
            let _ = handle.join();
        }
        StopOutcome::Stopped
    }

    /// Waits up to `timeout` for the active run to end.
    ///
    /// Returns the report of the most recent run once no run is active.
    pub fn wait(&self, timeout: Duration) -> Option<RunReport> {
        let state = self.shared.lock();
        let (state, _) = self
            .shared
            .finished
            .wait_timeout_while(state, timeout, |state| state.is_running)
            .unwrap_or_else(PoisonError::into_inner);
        if state.is_running {
            return None;
        }

        let report = state.last_report.clone();
        drop(state);
        if let Some(handle) = self.take_worker() {
            let _ = handle.join();
        }
        report
    }

    /// Current run state.
    pub fn snapshot(&self) -> RunSnapshot {
        let state = self.shared.lock();
        RunSnapshot {
            is_running: state.is_running,
            stop_requested: state.stop_requested,
            current_slot: state.current_slot,
            initial_date: state.initial_date,
            simulated_date: state.simulated_date,
            cycles: state.cycles,
        }
    }

    /// Returns `true` while a run is active.
    pub fn is_running(&self) -> bool {
        self.shared.lock().is_running
    }

    fn take_worker(&self) -> Option<JoinHandle<()>> {
        self.worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

/// Clears the running flag when the worker exits, however it exits.
struct RunStateReset<'a> {
    shared: &'a Shared,
    report: Option<RunReport>,
}

impl Drop for RunStateReset<'_> {
    fn drop(&mut self) {
        let mut state = self.shared.lock();
        state.is_running = false;
        state.stop_requested = false;
        state.current_slot = None;
        state.simulated_date = None;
        state.last_report = self.report.take();
        drop(state);
        self.shared.finished.notify_all();
    }
}

fn run_worker(deps: &RunDependencies, shared: &Shared, params: RunParameters) {
    let mut reset = RunStateReset {
        shared,
        report: None,
    };

    let report = Run {
        deps,
        shared,
        params,
    }
    .execute();

    match &report.outcome {
        RunOutcome::Completed => {
            info!(captured = report.captured, cycles = report.cycles, "run completed");
            deps.reporter.status(RunStage::Completed, "completed");
        }
        RunOutcome::Stopped => {
            info!(captured = report.captured, "run stopped");
            deps.reporter.status(RunStage::Stopped, "stopped");
        }
        RunOutcome::Failed(failure) => {
            error!(%failure, captured = report.captured, "run failed");
            deps.reporter
                .status(RunStage::Failed, &format!("failed: {failure}"));
        }
    }
    if let RestoreStatus::Failed(reason) = &report.restore {
        deps.reporter.status(
            RunStage::Failed,
            &format!("system date was not restored: {reason}"),
        );
    }

    reset.report = Some(report);
}

enum SlotCapture {
    Captured { path: PathBuf, attempts: u32 },
    Exhausted { attempts: u32 },
    Stopped { attempts: u32 },
}

struct Run<'a> {
    deps: &'a RunDependencies,
    shared: &'a Shared,
    params: RunParameters,
}

impl Run<'_> {
    fn token(&self) -> &CancellationToken {
        &self.shared.token
    }

    fn execute(&self) -> RunReport {
        let mut report = RunReport::new();

        match self.params.start_mode() {
            StartMode::Immediate => {
                let initial = self.shared.lock().initial_date;
                let initial = initial.unwrap_or_else(|| self.deps.clock.today());
                self.run_cycle(initial, &mut report);
            }
            StartMode::ScheduledOnce(at) => {
                let now = self.deps.clock.now();
                let target = now.date().and_time(at);
                if now >= target {
                    info!(at = %at.format("%H:%M"), "scheduled time already passed; starting now");
                } else if !self.wait_for_start(target, at) {
                    report.outcome = RunOutcome::Stopped;
                    return report;
                }
                self.run_cycle(self.deps.clock.today(), &mut report);
            }
            StartMode::ScheduledDaily(at) => loop {
                let target = next_occurrence(self.deps.clock.now(), at);
                info!(next = %target, "waiting for daily start");
                if !self.wait_for_start(target, at) {
                    report.outcome = RunOutcome::Stopped;
                    return report;
                }

                self.run_cycle(self.deps.clock.today(), &mut report);
                if report.outcome != RunOutcome::Completed {
                    return report;
                }
            },
        }

        report
    }

    fn wait_for_start(&self, target: NaiveDateTime, at: NaiveTime) -> bool {
        let reporter = &self.deps.reporter;
        let clock = &self.deps.clock;
        let label = at.format("%H:%M").to_string();

        let reached = wait_until(
            self.deps.timer.as_ref(),
            target,
            &|| clock.now(),
            self.token(),
            &mut |remaining: TimeDelta| {
                let secs = remaining.num_seconds().max(0) as u64;
                reporter.status(
                    RunStage::Waiting,
                    &format!("Waiting until {label} ({})", format_remaining(secs)),
                );
            },
        );
        if !reached {
            info!("stopped while waiting for scheduled start");
        }
        reached
    }

    /// Runs one full pass over all slots, restoring `initial` afterwards.
    fn run_cycle(&self, initial: NaiveDate, report: &mut RunReport) {
        {
            let mut state = self.shared.lock();
            state.initial_date = Some(initial);
            state.cycles += 1;
        }
        report.cycles += 1;
        info!(cycle = report.cycles, initial_date = %initial, "capture cycle started");

        let guard = DateOverride::acquire(
            self.deps.clock.as_ref(),
            initial,
            self.deps.settings.restore_retry_delay,
        );
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.run_slots(guard.initial_date(), report)
        }))
        .unwrap_or_else(|_| {
            error!("slot loop panicked");
            RunOutcome::Failed(RunFailure::Panicked)
        });

        if outcome == RunOutcome::Stopped {
            info!(date = %initial, "restoring initial date after stop");
        }
        report.restore = guard.release();
        report.outcome = outcome;
    }

    fn run_slots(&self, initial: NaiveDate, report: &mut RunReport) -> RunOutcome {
        let total = self.params.slot_count();
        let interval = self.params.interval_seconds();
        self.deps.reporter.progress(0, total);

        for index in 0..total {
            if self.token().is_cancelled() {
                info!(slot = index, "run stopped before slot");
                return RunOutcome::Stopped;
            }
            self.shared.lock().current_slot = Some(index);

            let date = if index == 0 {
                if !self.countdown(self.deps.settings.initial_countdown_secs, FIRST_CAPTURE_LABEL) {
                    return RunOutcome::Stopped;
                }
                initial
            } else {
                let Some(date) = simulated_date(initial, index) else {
                    error!(slot = index, "simulated date out of range");
                    return RunOutcome::Failed(RunFailure::DateOverflow { slot: index });
                };
                if let Err(source) = self.deps.clock.set_date(date) {
                    error!(slot = index, %date, error = %source, "failed to set system date");
                    return RunOutcome::Failed(RunFailure::DateChange {
                        slot: index,
                        date,
                        source,
                    });
                }
                date
            };
            self.shared.lock().simulated_date = Some(date);

            self.deps.reporter.status(
                RunStage::Capturing,
                &format!("Capturing {}/{total} ({date})", index + 1),
            );

            match self.capture_slot(index, initial) {
                SlotCapture::Captured { path, attempts } => {
                    report.slots.push(SlotResult {
                        index,
                        captured: true,
                        attempts,
                        simulated_date: date,
                        path: Some(path),
                    });
                    report.captured += 1;
                    self.deps.reporter.progress(index + 1, total);
                }
                SlotCapture::Stopped { attempts } => {
                    report.slots.push(uncaptured(index, attempts, date));
                    info!(slot = index, "stopped during capture retries");
                    return RunOutcome::Stopped;
                }
                SlotCapture::Exhausted { attempts } => {
                    report.slots.push(uncaptured(index, attempts, date));
                    warn!(slot = index, attempts, "capture retries exhausted; escalating");
                    let question = format!(
                        "Capture failed {attempts} times for slot {} of {total}. \
                         Continue with the next slot?",
                        index + 1
                    );
                    if !self.deps.escalation.confirm(&question) {
                        error!(slot = index, attempts, "capture failed; run not continued");
                        return RunOutcome::Failed(RunFailure::CaptureDeclined {
                            slot: index,
                            attempts,
                        });
                    }
                    warn!(slot = index, attempts, "capture failed; continuing with next slot");
                }
            }

            if index + 1 < total && !self.countdown(interval, NEXT_CAPTURE_LABEL) {
                return RunOutcome::Stopped;
            }
        }

        RunOutcome::Completed
    }

    fn capture_slot(&self, index: u32, session: NaiveDate) -> SlotCapture {
        let settings = &self.deps.settings;
        let max_attempts = settings.max_capture_retries.max(1);

        for attempt in 1..=max_attempts {
            if self.token().is_cancelled() {
                return SlotCapture::Stopped {
                    attempts: attempt - 1,
                };
            }

            match self.attempt_capture(session) {
                Ok(path) => {
                    info!(slot = index, attempt, path = %path.display(), "slot captured");
                    return SlotCapture::Captured {
                        path,
                        attempts: attempt,
                    };
                }
                Err(reason) => {
                    warn!(slot = index, attempt, %reason, "capture attempt failed");
                    self.deps.reporter.attempt_failed(index, attempt, &reason);
                }
            }

            if attempt < max_attempts && !self.deps.timer.pause(settings.retry_delay, self.token())
            {
                return SlotCapture::Stopped { attempts: attempt };
            }
        }

        if self.token().is_cancelled() {
            return SlotCapture::Stopped {
                attempts: max_attempts,
            };
        }
        SlotCapture::Exhausted {
            attempts: max_attempts,
        }
    }

    fn attempt_capture(&self, session: NaiveDate) -> Result<PathBuf, String> {
        if let Some(title) = self.params.target().window_title() {
            let focused = focus_window(
                self.deps.focuser.as_ref(),
                title,
                self.deps.settings.focus,
                self.deps.timer.as_ref(),
                self.token(),
            );
            if !focused {
                return Err(format!("{title} window could not be focused"));
            }
        }

        self.deps
            .capture
            .capture(session, self.deps.clock.now())
            .map_err(|error| error.to_string())
    }

    fn countdown(&self, seconds: u64, label: &str) -> bool {
        let reporter = &self.deps.reporter;
        let completed = self.deps.timer.countdown(seconds, label, self.token(), &mut |left| {
            reporter.countdown(label, left)
        });
        if !completed {
            info!(label, "countdown interrupted");
        }
        completed
    }
}

fn uncaptured(index: u32, attempts: u32, date: NaiveDate) -> SlotResult {
    SlotResult {
        index,
        captured: false,
        attempts,
        simulated_date: date,
        path: None,
    }
}

/// First moment at or after `now` whose time of day is `at`, excluding `now`
/// itself.
pub fn next_occurrence(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if now < today {
        return today;
    }
    today
        .checked_add_signed(TimeDelta::days(1))
        .unwrap_or(today)
}
