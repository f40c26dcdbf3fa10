//! Shared fakes for coordinator integration tests.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use dayshot_app::{RunCoordinator, RunDependencies, RunReport, RunSettings};
use dayshot_capture::{CaptureError, ScreenCapture};
use dayshot_core::{RunParameters, StartMode, TargetApplication};
use dayshot_system::{FocusPolicy, SimulatedClock, SimulatedFocuser};
use dayshot_timing::{CancellationToken, Timer};
use dayshot_ui::{Escalation, RunReporter, RunStage};

/// Start of every fixture run: Monday 2025-03-03 10:00:00.
#[allow(dead_code)]
pub fn fixture_start() -> NaiveDateTime {
    fixture_day(0)
        .and_hms_opt(10, 0, 0)
        .expect("fixture time should be valid")
}

/// Fixture start date plus `offset` days.
#[allow(dead_code)]
pub fn fixture_day(offset: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 3)
        .and_then(|date| date.checked_add_days(chrono::Days::new(offset)))
        .expect("fixture date should be valid")
}

/// Immediate Zoom run.
#[allow(dead_code)]
pub fn params(hours: u32, slots: u32) -> RunParameters {
    RunParameters::new(hours, slots, TargetApplication::Zoom, StartMode::Immediate)
        .expect("fixture parameters should be valid")
}

/// Timer that returns immediately, recording what it was asked to wait for.
///
/// Completed waits advance the attached clock, so scheduled starts are
/// reached without real sleeping.
#[allow(dead_code)]
pub struct RecordingTimer {
    clock: Option<Arc<SimulatedClock>>,
    cancel_on_countdown: Option<usize>,
    cancel_on_pause: Option<usize>,
    countdowns: Mutex<Vec<(u64, String)>>,
    pauses: Mutex<Vec<Duration>>,
}

#[allow(dead_code)]
impl RecordingTimer {
    pub fn new(clock: Option<Arc<SimulatedClock>>) -> Self {
        Self {
            clock,
            cancel_on_countdown: None,
            cancel_on_pause: None,
            countdowns: Mutex::new(Vec::new()),
            pauses: Mutex::new(Vec::new()),
        }
    }

    /// Cancels the run on the `number`-th countdown (one-based).
    pub fn cancel_on_countdown(mut self, number: usize) -> Self {
        self.cancel_on_countdown = Some(number);
        self
    }

    /// Cancels the run on the `number`-th pause (one-based).
    pub fn cancel_on_pause(mut self, number: usize) -> Self {
        self.cancel_on_pause = Some(number);
        self
    }

    pub fn countdowns(&self) -> Vec<(u64, String)> {
        self.countdowns.lock().expect("countdown lock should work").clone()
    }

    pub fn pauses(&self) -> Vec<Duration> {
        self.pauses.lock().expect("pause lock should work").clone()
    }

    fn advance(&self, by: Duration) {
        if let Some(clock) = &self.clock {
            clock.advance(by);
        }
    }
}

impl Timer for RecordingTimer {
    fn countdown(
        &self,
        seconds: u64,
        label: &str,
        token: &CancellationToken,
        on_tick: &mut dyn FnMut(u64),
    ) -> bool {
        let number = {
            let mut countdowns = self.countdowns.lock().expect("countdown lock should work");
            countdowns.push((seconds, label.to_string()));
            countdowns.len()
        };
        if self.cancel_on_countdown == Some(number) {
            token.cancel();
        }
        if token.is_cancelled() {
            return false;
        }

        on_tick(seconds);
        self.advance(Duration::from_secs(seconds));
        true
    }

    fn pause(&self, duration: Duration, token: &CancellationToken) -> bool {
        let number = {
            let mut pauses = self.pauses.lock().expect("pause lock should work");
            pauses.push(duration);
            pauses.len()
        };
        if self.cancel_on_pause == Some(number) {
            token.cancel();
        }
        if token.is_cancelled() {
            return false;
        }

        self.advance(duration);
        true
    }
}

/// Capture service answering from a script; succeeds once the script is
/// exhausted.
#[allow(dead_code)]
#[derive(Default)]
pub struct ScriptedCapture {
    script: Mutex<VecDeque<bool>>,
    calls: Mutex<Vec<(NaiveDate, NaiveDateTime)>>,
}

#[allow(dead_code)]
impl ScriptedCapture {
    pub fn with_script(script: impl IntoIterator<Item = bool>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// `(session, stamp)` of every capture call.
    pub fn calls(&self) -> Vec<(NaiveDate, NaiveDateTime)> {
        self.calls.lock().expect("call lock should work").clone()
    }
}

impl ScreenCapture for ScriptedCapture {
    fn capture(&self, session: NaiveDate, stamp: NaiveDateTime) -> Result<PathBuf, CaptureError> {
        self.calls
            .lock()
            .expect("call lock should work")
            .push((session, stamp));

        let succeed = self
            .script
            .lock()
            .expect("script lock should work")
            .pop_front()
            .unwrap_or(true);
        if succeed {
            Ok(PathBuf::from(format!("shots/{}.png", stamp.format("%Y-%m-%d_%H-%M-%S"))))
        } else {
            Err(CaptureError::Source("scripted failure".to_string()))
        }
    }
}

/// Reporter keeping every event.
#[allow(dead_code)]
#[derive(Default)]
pub struct RecordingReporter {
    statuses: Mutex<Vec<(RunStage, String)>>,
    progress: Mutex<Vec<(u32, u32)>>,
    failures: Mutex<Vec<(u32, u32, String)>>,
}

#[allow(dead_code)]
impl RecordingReporter {
    pub fn statuses(&self) -> Vec<(RunStage, String)> {
        self.statuses.lock().expect("status lock should work").clone()
    }

    pub fn last_status(&self) -> Option<(RunStage, String)> {
        self.statuses().last().cloned()
    }

    pub fn progress_reports(&self) -> Vec<(u32, u32)> {
        self.progress.lock().expect("progress lock should work").clone()
    }

    pub fn failures(&self) -> Vec<(u32, u32, String)> {
        self.failures.lock().expect("failure lock should work").clone()
    }
}

impl RunReporter for RecordingReporter {
    fn status(&self, stage: RunStage, text: &str) {
        self.statuses
            .lock()
            .expect("status lock should work")
            .push((stage, text.to_string()));
    }

    fn progress(&self, current: u32, total: u32) {
        self.progress
            .lock()
            .expect("progress lock should work")
            .push((current, total));
    }

    fn countdown(&self, _label: &str, _remaining_secs: u64) {}

    fn attempt_failed(&self, slot: u32, attempt: u32, reason: &str) {
        self.failures
            .lock()
            .expect("failure lock should work")
            .push((slot, attempt, reason.to_string()));
    }
}

/// Escalation with a fixed answer that counts questions.
#[allow(dead_code)]
pub struct ScriptedEscalation {
    answer: bool,
    asked: Mutex<Vec<String>>,
}

#[allow(dead_code)]
impl ScriptedEscalation {
    pub fn answering(answer: bool) -> Self {
        Self {
            answer,
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().expect("question lock should work").clone()
    }
}

impl Escalation for ScriptedEscalation {
    fn confirm(&self, question: &str) -> bool {
        self.asked
            .lock()
            .expect("question lock should work")
            .push(question.to_string());
        self.answer
    }
}

/// One set of fakes wired to a coordinator. Replace fields before calling
/// [`Harness::coordinator`] to customize.
#[allow(dead_code)]
pub struct Harness {
    pub clock: Arc<SimulatedClock>,
    pub focuser: Arc<SimulatedFocuser>,
    pub capture: Arc<ScriptedCapture>,
    pub timer: Arc<RecordingTimer>,
    pub reporter: Arc<RecordingReporter>,
    pub escalation: Arc<ScriptedEscalation>,
}

#[allow(dead_code)]
impl Harness {
    pub fn new() -> Self {
        Self::starting_at(fixture_start())
    }

    pub fn starting_at(at: NaiveDateTime) -> Self {
        let clock = Arc::new(SimulatedClock::frozen(at));
        Self {
            timer: Arc::new(RecordingTimer::new(Some(Arc::clone(&clock)))),
            clock,
            focuser: Arc::new(SimulatedFocuser::with_windows([
                "Zoom Meeting",
                "Microsoft Teams",
                "Google Chrome",
            ])),
            capture: Arc::new(ScriptedCapture::default()),
            reporter: Arc::new(RecordingReporter::default()),
            escalation: Arc::new(ScriptedEscalation::answering(false)),
        }
    }

    /// Replaces the timer with one built from this harness' clock.
    pub fn with_timer(mut self, build: impl FnOnce(RecordingTimer) -> RecordingTimer) -> Self {
        self.timer = Arc::new(build(RecordingTimer::new(Some(Arc::clone(&self.clock)))));
        self
    }

    pub fn coordinator(&self) -> RunCoordinator {
        self.coordinator_with_timer(self.timer.clone())
    }

    pub fn coordinator_with_timer(&self, timer: Arc<dyn Timer>) -> RunCoordinator {
        RunCoordinator::new(RunDependencies {
            clock: self.clock.clone(),
            focuser: self.focuser.clone(),
            capture: self.capture.clone(),
            timer,
            reporter: self.reporter.clone(),
            escalation: self.escalation.clone(),
            settings: quick_settings(),
        })
    }
}

/// Default settings with a near-instant restore retry.
#[allow(dead_code)]
pub fn quick_settings() -> RunSettings {
    RunSettings {
        restore_retry_delay: Duration::from_millis(1),
        focus: FocusPolicy {
            attempts: 3,
            delay: Duration::from_secs(1),
        },
        ..RunSettings::default()
    }
}

/// Waits for the run to end and returns its report.
#[allow(dead_code)]
pub fn finish(coordinator: &RunCoordinator) -> RunReport {
    coordinator
        .wait(Duration::from_secs(30))
        .expect("run should finish")
}
