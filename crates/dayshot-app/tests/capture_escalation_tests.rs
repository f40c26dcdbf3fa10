//! Integration tests for capture retries and the continue-or-abort decision.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{Harness, ScriptedCapture, ScriptedEscalation, finish, fixture_day, params};
use dayshot_app::{RunFailure, RunOutcome};
use dayshot_system::SimulatedFocuser;

#[test]
fn capture_escalation_tests_declined_escalation_fails_the_run() {
    let mut harness = Harness::new();
    harness.capture = Arc::new(ScriptedCapture::with_script([true, false, false, false]));
    let coordinator = harness.coordinator();

    coordinator.start_run(params(1, 4)).expect("run should start");
    let report = finish(&coordinator);

    assert_eq!(
        report.outcome,
        RunOutcome::Failed(RunFailure::CaptureDeclined {
            slot: 1,
            attempts: 3
        })
    );
    assert_eq!(report.captured, 1);
    assert_eq!(
        harness.clock.set_requests(),
        vec![fixture_day(1), fixture_day(0)]
    );

    let asked = harness.escalation.asked();
    assert_eq!(asked.len(), 1);
    assert!(asked[0].contains("slot 2 of 4"));

    let failures: Vec<(u32, u32)> = harness
        .reporter
        .failures()
        .into_iter()
        .map(|(slot, attempt, _)| (slot, attempt))
        .collect();
    assert_eq!(failures, vec![(1, 1), (1, 2), (1, 3)]);
    assert_eq!(
        harness.timer.pauses(),
        vec![Duration::from_secs(2), Duration::from_secs(2)]
    );
}

#[test]
fn capture_escalation_tests_accepted_escalation_continues_with_next_day() {
    let mut harness = Harness::new();
    harness.capture = Arc::new(ScriptedCapture::with_script([true, false, false, false]));
    harness.escalation = Arc::new(ScriptedEscalation::answering(true));
    let coordinator = harness.coordinator();

    coordinator.start_run(params(1, 4)).expect("run should start");
    let report = finish(&coordinator);

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.captured, 3);
    assert!(!report.slots[1].captured);
    assert_eq!(report.slots[2].simulated_date, fixture_day(2));
    assert_eq!(
        harness.reporter.progress_reports(),
        vec![(0, 4), (1, 4), (3, 4), (4, 4)]
    );
}

#[test]
fn capture_escalation_tests_late_success_records_attempts() {
    let mut harness = Harness::new();
    harness.capture = Arc::new(ScriptedCapture::with_script([false, true]));
    let coordinator = harness.coordinator();

    coordinator.start_run(params(1, 1)).expect("run should start");
    let report = finish(&coordinator);

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert!(report.slots[0].captured);
    assert_eq!(report.slots[0].attempts, 2);
    assert!(harness.escalation.asked().is_empty());
}

#[test]
fn capture_escalation_tests_missing_window_counts_as_failed_attempt() {
    let mut harness = Harness::new();
    harness.focuser = Arc::new(SimulatedFocuser::with_windows(Vec::<String>::new()));
    let coordinator = harness.coordinator();

    coordinator.start_run(params(1, 1)).expect("run should start");
    let report = finish(&coordinator);

    assert!(matches!(
        report.outcome,
        RunOutcome::Failed(RunFailure::CaptureDeclined { slot: 0, .. })
    ));
    assert!(harness.capture.calls().is_empty());
    assert_eq!(harness.escalation.asked().len(), 1);
    assert!(
        harness
            .reporter
            .failures()
            .iter()
            .all(|(_, _, reason)| reason.contains("could not be focused"))
    );
}
