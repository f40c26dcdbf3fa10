//! System date access.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta};
use thiserror::Error;
use tracing::{debug, info};

/// Reads and sets the local system date.
pub trait ClockController: Send + Sync {
    /// Current local date and time as seen by the OS.
    fn now(&self) -> NaiveDateTime;

    /// Current local date.
    fn today(&self) -> NaiveDate {
        self.now().date()
    }

    /// Sets the local date, leaving the time of day to the OS.
    ///
    /// # Errors
    /// Returns [`ClockError`] when the OS rejects the change or the date read
    /// back afterwards differs from `date`.
    fn set_date(&self, date: NaiveDate) -> Result<(), ClockError>;

    /// Returns `true` when this process is allowed to change the date.
    fn can_set_date(&self) -> bool;
}

/// The machine's real clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct HostClock;

impl HostClock {
    /// Creates a handle to the host clock.
    pub fn new() -> Self {
        Self
    }
}

impl ClockController for HostClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }

    fn set_date(&self, date: NaiveDate) -> Result<(), ClockError> {
        apply_date(date, self.now().time())?;

        let actual = self.today();
        if actual != date {
            return Err(ClockError::Verification {
                requested: date,
                actual,
            });
        }

        info!(%date, "system date set");
        Ok(())
    }

    fn can_set_date(&self) -> bool {
        has_clock_privileges()
    }
}

#[cfg(windows)]
fn apply_date(date: NaiveDate, _time_of_day: NaiveTime) -> Result<(), ClockError> {
    use chrono::Datelike;
    use windows_sys::Win32::Foundation::SYSTEMTIME;
    use windows_sys::Win32::System::SystemInformation::{GetLocalTime, SetLocalTime};

    let mut system_time: SYSTEMTIME = unsafe {
        // Safety:
        // - SYSTEMTIME is plain data; zeroed is overwritten by GetLocalTime.
        std::mem::zeroed()
    };
    unsafe {
        // Safety:
        // - `system_time` is a valid, writable SYSTEMTIME.
        GetLocalTime(&mut system_time);
    }

    system_time.wYear = u16::try_from(date.year()).map_err(|_| ClockError::OutOfRange(date))?;
    system_time.wMonth = date.month() as u16;
    system_time.wDay = date.day() as u16;
    system_time.wDayOfWeek = date.weekday().num_days_from_sunday() as u16;

    let applied = unsafe {
        // Safety:
        // - `system_time` is fully initialized and outlives the call.
        SetLocalTime(&system_time)
    };
    if applied == 0 {
        return Err(ClockError::Rejected(
            std::io::Error::last_os_error().to_string(),
        ));
    }

    Ok(())
}

#[cfg(target_os = "linux")]
fn apply_date(date: NaiveDate, time_of_day: NaiveTime) -> Result<(), ClockError> {
    let stamp = format!(
        "{} {}",
        date.format("%Y-%m-%d"),
        time_of_day.format("%H:%M:%S")
    );
    let output = std::process::Command::new("date")
        .arg("-s")
        .arg(&stamp)
        .output()
        .map_err(|error| ClockError::Rejected(format!("failed to run date: {error}")))?;

    if !output.status.success() {
        return Err(ClockError::Rejected(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ));
    }

    debug!(%stamp, "date -s applied");
    Ok(())
}

#[cfg(not(any(windows, target_os = "linux")))]
fn apply_date(_date: NaiveDate, _time_of_day: NaiveTime) -> Result<(), ClockError> {
    Err(ClockError::Unsupported)
}

#[cfg(windows)]
fn has_clock_privileges() -> bool {
    use windows_sys::Win32::UI::Shell::IsUserAnAdmin;

    unsafe {
        // Safety:
        // - Takes no arguments and only queries the current process token.
        IsUserAnAdmin() != 0
    }
}

#[cfg(target_os = "linux")]
fn has_clock_privileges() -> bool {
    std::process::Command::new("id")
        .arg("-u")
        .output()
        .map(|output| String::from_utf8_lossy(&output.stdout).trim() == "0")
        .unwrap_or(false)
}

#[cfg(not(any(windows, target_os = "linux")))]
fn has_clock_privileges() -> bool {
    false
}

/// In-memory clock used by tests and `--simulate` runs.
///
/// Every `set_date` request is recorded, and failures can be injected per
/// date.
#[derive(Debug)]
pub struct SimulatedClock {
    state: Mutex<SimulatedState>,
}

#[derive(Debug)]
struct SimulatedState {
    base: NaiveDateTime,
    anchor: Option<Instant>,
    requests: Vec<NaiveDate>,
    failures: HashMap<NaiveDate, u32>,
    privileged: bool,
}

impl SimulatedClock {
    /// Starts at the real local time and keeps ticking with wall time.
    pub fn live() -> Self {
        Self::with_state(Local::now().naive_local(), Some(Instant::now()))
    }

    /// Starts at `at` and only moves through [`advance`](Self::advance) or
    /// `set_date`.
    pub fn frozen(at: NaiveDateTime) -> Self {
        Self::with_state(at, None)
    }

    fn with_state(base: NaiveDateTime, anchor: Option<Instant>) -> Self {
        Self {
            state: Mutex::new(SimulatedState {
                base,
                anchor,
                requests: Vec::new(),
                failures: HashMap::new(),
                privileged: true,
            }),
        }
    }

    /// Makes [`ClockController::can_set_date`] report `false`.
    pub fn without_privileges(self) -> Self {
        self.lock().privileged = false;
        self
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut state = self.lock();
        state.base += TimeDelta::from_std(by).unwrap_or_else(|_| TimeDelta::zero());
    }

    /// Rejects the next `times` requests to set `date`.
    pub fn fail_next(&self, date: NaiveDate, times: u32) {
        self.lock().failures.insert(date, times);
    }

    /// Every date passed to `set_date` so far, including rejected ones.
    pub fn set_requests(&self) -> Vec<NaiveDate> {
        self.lock().requests.clone()
    }

    fn lock(&self) -> MutexGuard<'_, SimulatedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl SimulatedState {
    fn current(&self) -> NaiveDateTime {
        let elapsed = self
            .anchor
            .map(|anchor| TimeDelta::from_std(anchor.elapsed()).unwrap_or_else(|_| TimeDelta::zero()))
            .unwrap_or_else(TimeDelta::zero);
        self.base + elapsed
    }
}

impl ClockController for SimulatedClock {
    fn now(&self) -> NaiveDateTime {
        self.lock().current()
    }

    fn set_date(&self, date: NaiveDate) -> Result<(), ClockError> {
        let mut state = self.lock();
        state.requests.push(date);

        if let Some(remaining) = state.failures.get_mut(&date)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(ClockError::Rejected(format!(
                "simulated rejection of {date}"
            )));
        }

        let current = state.current();
        let shift = date.and_time(current.time()) - current;
        state.base += shift;
        debug!(%date, "simulated date set");
        Ok(())
    }

    fn can_set_date(&self) -> bool {
        self.lock().privileged
    }
}

/// Clock layer error type.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClockError {
    /// The OS (or simulated clock) refused the change.
    #[error("system date change rejected: {0}")]
    Rejected(String),
    /// The date read back after the change is not the requested one.
    #[error("system date verification failed: requested {requested}, clock shows {actual}")]
    Verification {
        /// Requested date.
        requested: NaiveDate,
        /// Date observed after the change.
        actual: NaiveDate,
    },
    /// Date cannot be represented by the platform API.
    #[error("date {0} is out of the supported range")]
    OutOfRange(NaiveDate),
    /// No date backend exists for this platform.
    #[error("setting the system date is not supported on this platform")]
    Unsupported,
}

#[cfg(test)]
mod tests {
    //! Unit tests for the simulated clock.

    use super::*;

    fn start() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2025, 3, 10)
            .and_then(|date| date.and_hms_opt(14, 30, 0))
            .expect("valid datetime")
    }

    #[test]
    fn set_date_keeps_time_of_day() {
        let clock = SimulatedClock::frozen(start());
        let next = NaiveDate::from_ymd_opt(2025, 3, 11).expect("valid date");

        clock.set_date(next).expect("set should succeed");
        assert_eq!(clock.now(), next.and_hms_opt(14, 30, 0).expect("valid time"));

        clock.advance(Duration::from_secs(90));
        assert_eq!(clock.now(), next.and_hms_opt(14, 31, 30).expect("valid time"));
        assert_eq!(clock.set_requests(), vec![next]);
    }

    #[test]
    fn injected_failures_are_consumed_in_order() {
        let clock = SimulatedClock::frozen(start());
        let original = start().date();
        clock.fail_next(original, 1);

        assert!(matches!(
            clock.set_date(original),
            Err(ClockError::Rejected(_))
        ));
        clock.set_date(original).expect("second request should pass");
        assert_eq!(clock.set_requests(), vec![original, original]);
    }

    #[test]
    fn privileges_can_be_revoked() {
        assert!(SimulatedClock::frozen(start()).can_set_date());
        assert!(!SimulatedClock::frozen(start()).without_privileges().can_set_date());
    }
}
