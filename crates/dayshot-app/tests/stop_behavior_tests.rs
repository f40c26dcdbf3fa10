//! Integration tests for stop requests and cleanup.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{Harness, ScriptedCapture, finish, fixture_day, params};
use dayshot_app::{RestoreStatus, RunOutcome, StopOutcome};
use dayshot_system::SimulatedFocuser;
use dayshot_timing::PollingTimer;
use dayshot_ui::RunStage;

#[test]
fn stop_behavior_tests_stop_between_slots_keeps_completed_captures() {
    let harness = Harness::new().with_timer(|timer| timer.cancel_on_countdown(3));
    let coordinator = harness.coordinator();

    coordinator.start_run(params(1, 4)).expect("run should start");
    let report = finish(&coordinator);

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.captured, 2);
    assert_eq!(report.restore, RestoreStatus::Restored);
    assert_eq!(harness.reporter.progress_reports().last(), Some(&(2, 4)));
    assert_eq!(
        harness.clock.set_requests(),
        vec![fixture_day(1), fixture_day(0)]
    );
    assert_eq!(
        harness.reporter.last_status(),
        Some((RunStage::Stopped, "stopped".to_string()))
    );
}

#[test]
fn stop_behavior_tests_stop_during_first_countdown_is_prompt() {
    let harness = Harness::new();
    let coordinator = harness.coordinator_with_timer(Arc::new(PollingTimer::default()));

    coordinator.start_run(params(1, 4)).expect("run should start");
    assert!(coordinator.is_running());

    let requested = Instant::now();
    let outcome = coordinator.stop_run(Duration::from_secs(5));
    assert_eq!(outcome, StopOutcome::Stopped);
    assert!(requested.elapsed() < Duration::from_secs(2));
    assert!(!coordinator.is_running());

    let report = finish(&coordinator);
    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.captured, 0);
    assert!(harness.capture.calls().is_empty());
    assert_eq!(harness.clock.set_requests(), vec![fixture_day(0)]);
    assert!(
        harness
            .reporter
            .statuses()
            .contains(&(RunStage::Stopping, "Stopping...".to_string()))
    );
}

#[test]
fn stop_behavior_tests_stop_when_idle_is_a_no_op() {
    let harness = Harness::new();
    let coordinator = harness.coordinator();

    assert_eq!(
        coordinator.stop_run(Duration::from_millis(10)),
        StopOutcome::NotRunning
    );
    assert!(harness.reporter.statuses().is_empty());
}

#[test]
fn stop_behavior_tests_stop_during_retry_skips_escalation() {
    let mut harness = Harness::new().with_timer(|timer| timer.cancel_on_pause(1));
    harness.capture = Arc::new(ScriptedCapture::with_script([false]));
    let coordinator = harness.coordinator();

    coordinator.start_run(params(1, 2)).expect("run should start");
    let report = finish(&coordinator);

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.slots.len(), 1);
    assert!(!report.slots[0].captured);
    assert_eq!(report.slots[0].attempts, 1);
    assert!(harness.escalation.asked().is_empty());
    assert_eq!(harness.reporter.failures().len(), 1);
}

#[test]
fn stop_behavior_tests_stop_during_last_attempt_skips_escalation() {
    // Pauses 1-6 belong to the first two attempts; pause 7 is the first
    // focus retry of the last attempt.
    let mut harness = Harness::new().with_timer(|timer| timer.cancel_on_pause(7));
    harness.focuser = Arc::new(SimulatedFocuser::with_windows(Vec::<String>::new()));
    let coordinator = harness.coordinator();

    coordinator.start_run(params(1, 2)).expect("run should start");
    let report = finish(&coordinator);

    assert_eq!(report.outcome, RunOutcome::Stopped);
    assert_eq!(report.slots.len(), 1);
    assert!(!report.slots[0].captured);
    assert_eq!(report.slots[0].attempts, 3);
    assert!(harness.escalation.asked().is_empty());
    assert!(harness.capture.calls().is_empty());
    assert_eq!(harness.clock.set_requests(), vec![fixture_day(0)]);
    assert_eq!(
        harness.reporter.last_status(),
        Some((RunStage::Stopped, "stopped".to_string()))
    );
}
